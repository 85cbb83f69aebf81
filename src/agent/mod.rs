// src/agent/mod.rs
//
// Per-intersection signal controllers.
//
// Design:
// - Agent trait: one `step` per tick, driven sequentially by the environment
// - AgentBase: state every family shares (roads, phases, movements, reward
//   history, action mode, all-red clearing between phase switches)
// - build_agents: explicit registry from AgentKind to implementation
//
// Families: fixed-time, analytical (max pressure), learning / presslight (DQN).

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::{AgentKind, Config};
use crate::rl::Dqn;
use crate::sim::Engine;
use crate::types::{IntersectionInfo, LaneId, PhaseInfo, RoadId, VehicleId};

pub mod analytical;
pub mod fixed;
pub mod learning;
pub mod movement;

pub use analytical::AnalyticalAgent;
pub use fixed::FixedAgent;
pub use learning::{LearningAgent, RewardMode};
pub use movement::Movement;

/// What the agent does on its next due tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionMode {
    /// Choose and apply a phase.
    #[default]
    Act,
    /// Evaluate the last action and record its reward.
    Reward,
}

/// Everything an agent may read or drive during one tick.
pub struct StepContext<'a> {
    pub engine: &'a mut dyn Engine,
    pub time: u64,
    pub lane_vehs: &'a BTreeMap<LaneId, Vec<VehicleId>>,
    pub lanes_count: &'a BTreeMap<LaneId, usize>,
    /// Cumulative per-vehicle distance; empty unless the active family needs it.
    pub veh_distance: &'a BTreeMap<VehicleId, f64>,
    pub eps: f64,
    /// Last tick of the episode.
    pub done: bool,
}

pub trait Agent {
    fn kind(&self) -> AgentKind;

    fn base(&self) -> &AgentBase;

    fn base_mut(&mut self) -> &mut AgentBase;

    fn step(&mut self, ctx: &mut StepContext<'_>);

    fn id(&self) -> &str {
        &self.base().id
    }

    fn reset_movements(&mut self) {
        self.base_mut().reset_movements();
    }

    /// Prepare for a new episode: empty reward history, fresh movement
    /// counters, default action mode.
    fn reset_episode(&mut self) {
        self.base_mut().reset_episode();
    }

    /// Learner, for families that have one.
    fn dqn(&self) -> Option<&Dqn> {
        None
    }

    fn dqn_mut(&mut self) -> Option<&mut Dqn> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct AgentBase {
    pub id: String,
    pub in_roads: Vec<RoadId>,
    pub out_roads: Vec<RoadId>,
    pub phases: Vec<PhaseInfo>,
    /// Phases with at least one green movement; the action space.
    pub green_phases: Vec<usize>,
    pub clearing_phase: Option<usize>,
    pub movements: Vec<Movement>,
    pub total_rewards: Vec<f64>,
    pub action_mode: ActionMode,
    /// Phase the agent last committed to (shown once clearing ends).
    pub phase: usize,
    /// Tick at which the next decision or evaluation is due.
    pub action_end_time: u64,
    pub action_freq: u64,
    pub clearing_time: u64,
    pending: Option<(usize, u64)>,
    in_lanes: Vec<LaneId>,
    out_lanes: Vec<LaneId>,
    served_distance: f64,
    last_distance: BTreeMap<VehicleId, f64>,
}

fn unique_lanes<'a>(lanes: impl Iterator<Item = &'a LaneId>) -> Vec<LaneId> {
    lanes
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl AgentBase {
    pub fn new(info: &IntersectionInfo, action_freq: u64, clearing_time: u64) -> Self {
        let movements: Vec<Movement> = info
            .movements
            .iter()
            .enumerate()
            .map(|(i, m)| Movement::new(i, m))
            .collect();
        let in_lanes = unique_lanes(info.movements.iter().flat_map(|m| m.in_lanes.iter()));
        let out_lanes = unique_lanes(info.movements.iter().flat_map(|m| m.out_lanes.iter()));
        let clearing_phase = info.clearing_phase();

        Self {
            id: info.id.clone(),
            in_roads: info.in_roads.clone(),
            out_roads: info.out_roads.clone(),
            phases: info.phases.clone(),
            green_phases: info.green_phases(),
            clearing_phase,
            movements,
            total_rewards: Vec::new(),
            action_mode: ActionMode::Act,
            phase: clearing_phase.unwrap_or(0),
            action_end_time: 0,
            action_freq: action_freq.max(1),
            clearing_time,
            pending: None,
            in_lanes,
            out_lanes,
            served_distance: 0.0,
            last_distance: BTreeMap::new(),
        }
    }

    pub fn in_lanes(&self) -> &[LaneId] {
        &self.in_lanes
    }

    pub fn out_lanes(&self) -> &[LaneId] {
        &self.out_lanes
    }

    pub fn update_movements(&mut self, lane_vehs: &BTreeMap<LaneId, Vec<VehicleId>>) {
        for m in &mut self.movements {
            m.update_arr_dep(lane_vehs);
        }
    }

    pub fn reset_movements(&mut self) {
        for m in &mut self.movements {
            m.reset();
        }
        self.served_distance = 0.0;
        self.last_distance.clear();
    }

    pub fn reset_episode(&mut self) {
        self.reset_movements();
        self.total_rewards.clear();
        self.action_mode = ActionMode::Act;
        self.phase = self.clearing_phase.unwrap_or(0);
        self.pending = None;
        self.action_end_time = 0;
    }

    /// True while an all-red interval is running.
    pub fn is_clearing(&self) -> bool {
        self.pending.is_some()
    }

    /// Decision is due at `time`.
    pub fn is_due(&self, time: u64) -> bool {
        !self.is_clearing() && time >= self.action_end_time
    }

    /// Commit to `phase`. Switching between two green phases first shows the
    /// clearing phase for `clearing_time` ticks. Returns the ticks spent
    /// clearing.
    pub fn request_phase(&mut self, engine: &mut dyn Engine, time: u64, phase: usize) -> u64 {
        if phase == self.phase && !self.is_clearing() {
            return 0;
        }
        let from_clearing = Some(self.phase) == self.clearing_phase;
        let delay = match self.clearing_phase {
            Some(clear) if !from_clearing && self.clearing_time > 0 => {
                self.set_engine_phase(engine, clear);
                self.pending = Some((phase, time + self.clearing_time));
                self.clearing_time
            }
            _ => {
                self.set_engine_phase(engine, phase);
                self.pending = None;
                0
            }
        };
        self.phase = phase;
        delay
    }

    /// Show the committed phase once the clearing interval has elapsed.
    pub fn advance_clearing(&mut self, engine: &mut dyn Engine, time: u64) {
        if let Some((phase, at)) = self.pending {
            if time >= at {
                self.set_engine_phase(engine, phase);
                self.pending = None;
            }
        }
    }

    fn set_engine_phase(&self, engine: &mut dyn Engine, phase: usize) {
        if let Err(e) = engine.set_phase(&self.id, phase) {
            warn!(agent = %self.id, phase, error = %e, "engine rejected phase");
        }
    }

    /// Stopped vehicles on the incoming lanes.
    pub fn queue_length(&self, waiting: &BTreeMap<LaneId, usize>) -> usize {
        self.in_lanes
            .iter()
            .map(|l| waiting.get(l).copied().unwrap_or(0))
            .sum()
    }

    /// Incoming minus outgoing vehicles over the intersection's lanes.
    pub fn pressure(&self, lanes_count: &BTreeMap<LaneId, usize>) -> f64 {
        let sum = |lanes: &[LaneId]| -> usize {
            lanes
                .iter()
                .map(|l| lanes_count.get(l).copied().unwrap_or(0))
                .sum()
        };
        sum(&self.in_lanes) as f64 - sum(&self.out_lanes) as f64
    }

    /// Summed movement pressure of a phase.
    pub fn phase_pressure(&self, phase: usize, lanes_count: &BTreeMap<LaneId, usize>) -> f64 {
        self.phases
            .get(phase)
            .map(|p| {
                p.movements
                    .iter()
                    .filter_map(|&m| self.movements.get(m))
                    .map(|m| m.pressure(lanes_count))
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Accumulate distance covered by vehicles while on the incoming lanes.
    pub fn record_distance(
        &mut self,
        lane_vehs: &BTreeMap<LaneId, Vec<VehicleId>>,
        veh_distance: &BTreeMap<VehicleId, f64>,
    ) {
        if veh_distance.is_empty() {
            return;
        }
        let mut seen = BTreeMap::new();
        for lane in &self.in_lanes {
            for v in lane_vehs.get(lane).into_iter().flatten() {
                if let Some(&d) = veh_distance.get(v) {
                    if let Some(prev) = self.last_distance.get(v) {
                        self.served_distance += (d - prev).max(0.0);
                    }
                    seen.insert(v.clone(), d);
                }
            }
        }
        self.last_distance = seen;
    }

    pub fn served_distance(&self) -> f64 {
        self.served_distance
    }

    pub fn mean_reward(&self) -> f64 {
        if self.total_rewards.is_empty() {
            0.0
        } else {
            self.total_rewards.iter().sum::<f64>() / self.total_rewards.len() as f64
        }
    }
}

/// Construct one agent of `kind` for an intersection.
pub fn build_agent(
    kind: AgentKind,
    info: &IntersectionInfo,
    cfg: &Config,
    index: usize,
) -> Box<dyn Agent> {
    let base = AgentBase::new(info, cfg.action_freq, cfg.clearing_time);
    match kind {
        AgentKind::Fixed => Box::new(FixedAgent::new(base, cfg.fixed_phase_time)),
        AgentKind::Analytical => Box::new(AnalyticalAgent::new(base)),
        AgentKind::Learning => Box::new(LearningAgent::new(
            base,
            RewardMode::Queue,
            &cfg.dqn_config(index),
            cfg.update_freq,
            cfg.batch_size,
        )),
        AgentKind::Presslight => Box::new(LearningAgent::new(
            base,
            RewardMode::Pressure,
            &cfg.dqn_config(index),
            cfg.update_freq,
            cfg.batch_size,
        )),
    }
}

/// One agent per controllable intersection. Loads `cfg.load` into every
/// learning agent; a malformed checkpoint is an error.
pub fn build_agents(engine: &dyn Engine, cfg: &Config) -> anyhow::Result<Vec<Box<dyn Agent>>> {
    let mut agents = Vec::new();
    for (index, info) in engine.intersections().iter().enumerate() {
        if info.green_phases().is_empty() {
            debug!(intersection = %info.id, "no green phases; skipping");
            continue;
        }
        let mut agent = build_agent(cfg.agents_type, info, cfg, index);
        if let (Some(path), Some(dqn)) = (&cfg.load, agent.dqn_mut()) {
            dqn.load(path)
                .with_context(|| format!("loading weights for agent {}", info.id))?;
            info!(agent = %info.id, path = %path.display(), "loaded checkpoint");
        }
        agents.push(agent);
    }
    info!(count = agents.len(), kind = %cfg.agents_type, "agents built");
    Ok(agents)
}
