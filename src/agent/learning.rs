// src/agent/learning.rs
//
// DQN-driven controller shared by the `learning` and `presslight` families.
//
// Cycle:
// - Act: observe, pick a green phase epsilon-greedily, apply it
// - Reward: `action_freq` ticks later, score the outcome, store the
//   transition, then act again on the same tick
//
// Observation: per-movement incoming vehicle counts (presslight adds
// outgoing counts) followed by a one-hot of the current green phase.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::{ActionMode, Agent, AgentBase, StepContext};
use crate::config::AgentKind;
use crate::rl::{Dqn, DqnConfig, Transition};
use crate::types::LaneId;

/// Vehicle counts enter the network in tens.
const COUNT_SCALE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardMode {
    /// Negative stopped-vehicle count on the incoming lanes.
    Queue,
    /// Negative absolute intersection pressure.
    Pressure,
}

pub struct LearningAgent {
    base: AgentBase,
    mode: RewardMode,
    dqn: Dqn,
    update_freq: u64,
    batch_size: usize,
    last_state: Vec<f64>,
    last_action: usize,
}

impl LearningAgent {
    pub fn new(
        base: AgentBase,
        mode: RewardMode,
        dqn_cfg: &DqnConfig,
        update_freq: u64,
        batch_size: usize,
    ) -> Self {
        let n_states = observation_len(&base, mode);
        let n_actions = base.green_phases.len().max(1);
        Self {
            dqn: Dqn::new(n_states, n_actions, dqn_cfg),
            base,
            mode,
            update_freq: update_freq.max(1),
            batch_size: batch_size.max(1),
            last_state: Vec::new(),
            last_action: 0,
        }
    }

    pub fn observe(&self, lanes_count: &BTreeMap<LaneId, usize>) -> Vec<f64> {
        let mut state = Vec::with_capacity(self.dqn.num_states());
        for m in &self.base.movements {
            state.push(m.demand(lanes_count) as f64 * COUNT_SCALE);
        }
        if self.mode == RewardMode::Pressure {
            for m in &self.base.movements {
                state.push(m.downstream(lanes_count) as f64 * COUNT_SCALE);
            }
        }
        for &phase in &self.base.green_phases {
            state.push(if phase == self.base.phase { 1.0 } else { 0.0 });
        }
        state
    }

    fn reward(&self, ctx: &StepContext<'_>) -> f64 {
        match self.mode {
            RewardMode::Queue => {
                let waiting = ctx.engine.lane_waiting_vehicle_count();
                -(self.base.queue_length(&waiting) as f64)
            }
            RewardMode::Pressure => -self.base.pressure(ctx.lanes_count).abs(),
        }
    }

    fn act(&mut self, ctx: &mut StepContext<'_>) {
        let state = self.observe(ctx.lanes_count);
        let action = self.dqn.select_action(&state, ctx.eps);
        let Some(&phase) = self.base.green_phases.get(action) else {
            return;
        };
        let delay = self.base.request_phase(ctx.engine, ctx.time, phase);
        self.base.action_end_time = ctx.time + delay + self.base.action_freq;
        self.base.action_mode = ActionMode::Reward;
        self.last_state = state;
        self.last_action = action;
        trace!(agent = %self.base.id, phase, eps = ctx.eps, time = ctx.time, "dqn action");
    }

    fn collect_reward(&mut self, ctx: &mut StepContext<'_>) {
        let reward = self.reward(ctx);
        let next_state = self.observe(ctx.lanes_count);
        self.dqn.remember(Transition {
            state: std::mem::take(&mut self.last_state),
            action: self.last_action,
            reward: reward * COUNT_SCALE,
            next_state,
            done: ctx.done,
        });
        self.base.total_rewards.push(reward);
        self.base.action_mode = ActionMode::Act;
    }
}

fn observation_len(base: &AgentBase, mode: RewardMode) -> usize {
    let per_movement = match mode {
        RewardMode::Queue => 1,
        RewardMode::Pressure => 2,
    };
    base.movements.len() * per_movement + base.green_phases.len()
}

impl Agent for LearningAgent {
    fn kind(&self) -> AgentKind {
        match self.mode {
            RewardMode::Queue => AgentKind::Learning,
            RewardMode::Pressure => AgentKind::Presslight,
        }
    }

    fn base(&self) -> &AgentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AgentBase {
        &mut self.base
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self.base.update_movements(ctx.lane_vehs);
        self.base.record_distance(ctx.lane_vehs, ctx.veh_distance);
        self.base.advance_clearing(ctx.engine, ctx.time);

        let due = self.base.is_due(ctx.time);
        if self.base.action_mode == ActionMode::Reward && (due || ctx.done) {
            self.collect_reward(ctx);
        }
        if self.base.action_mode == ActionMode::Act && due && !ctx.done {
            self.act(ctx);
        }

        if ctx.time > 0 && ctx.time % self.update_freq == 0 {
            if let Some(loss) = self.dqn.optimize(self.batch_size) {
                debug!(agent = %self.base.id, loss, updates = self.dqn.updates(), "dqn update");
            }
        }
    }

    fn reset_episode(&mut self) {
        self.base.reset_episode();
        self.last_state.clear();
        self.last_action = 0;
    }

    fn dqn(&self) -> Option<&Dqn> {
        Some(&self.dqn)
    }

    fn dqn_mut(&mut self) -> Option<&mut Dqn> {
        Some(&mut self.dqn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Engine, GridEngine, GridSpec, Roadnet, SimConfig};

    fn engine() -> GridEngine {
        let spec = GridSpec::default();
        let net = Roadnet::grid(&spec);
        let flows = net.grid_flows(&spec);
        GridEngine::new(&SimConfig::default(), net, flows, 1).unwrap()
    }

    fn agent(eng: &GridEngine, mode: RewardMode) -> LearningAgent {
        let info = eng.intersections()[0].clone();
        LearningAgent::new(AgentBase::new(&info, 5, 2), mode, &DqnConfig::default(), 10, 4)
    }

    fn tick(agent: &mut LearningAgent, eng: &mut GridEngine, time: u64, done: bool) {
        let lane_vehs = eng.lane_vehicles();
        let counts = eng.lane_vehicle_count();
        let dist = eng.vehicle_distance();
        let mut ctx = StepContext {
            engine: eng,
            time,
            lane_vehs: &lane_vehs,
            lanes_count: &counts,
            veh_distance: &dist,
            eps: 1.0,
            done,
        };
        agent.step(&mut ctx);
    }

    #[test]
    fn test_observation_sizes() {
        let eng = engine();
        let q = agent(&eng, RewardMode::Queue);
        let p = agent(&eng, RewardMode::Pressure);
        // 12 movements, 4 green phases
        assert_eq!(q.dqn.num_states(), 16);
        assert_eq!(p.dqn.num_states(), 28);
        assert_eq!(q.dqn.num_actions(), 4);
        assert_eq!(q.observe(&BTreeMap::new()).len(), 16);
    }

    #[test]
    fn test_act_reward_cycle_fills_memory() {
        let mut eng = engine();
        let mut a = agent(&eng, RewardMode::Queue);
        for t in 0..60 {
            tick(&mut a, &mut eng, t, false);
            eng.next_step();
        }
        assert!(!a.base().total_rewards.is_empty());
        assert_eq!(a.dqn.memory().len(), a.base().total_rewards.len());
        assert!(a.base().total_rewards.iter().all(|r| *r <= 0.0));
        assert!(a.dqn.updates() > 0);
    }

    #[test]
    fn test_done_closes_open_transition() {
        let mut eng = engine();
        let mut a = agent(&eng, RewardMode::Pressure);
        tick(&mut a, &mut eng, 0, false);
        assert_eq!(a.base().action_mode, ActionMode::Reward);
        eng.next_step();
        tick(&mut a, &mut eng, 1, true);
        assert_eq!(a.base().action_mode, ActionMode::Act);
        assert_eq!(a.dqn.memory().len(), 1);
    }

    #[test]
    fn test_reset_episode_keeps_weights() {
        let mut eng = engine();
        let mut a = agent(&eng, RewardMode::Queue);
        let before = a.dqn.policy().clone();
        tick(&mut a, &mut eng, 0, false);
        a.reset_episode();
        assert_eq!(a.base().action_mode, ActionMode::Act);
        assert!(a.base().total_rewards.is_empty());
        assert_eq!(a.dqn.policy(), &before);
    }
}
