// src/agent/analytical.rs
//
// Max-pressure controller. Every `action_freq` ticks it serves the green
// phase whose movements carry the largest summed pressure. Ties go to the
// phase listed first.

use std::collections::BTreeMap;

use tracing::trace;

use super::{Agent, AgentBase, StepContext};
use crate::config::AgentKind;
use crate::types::LaneId;

pub struct AnalyticalAgent {
    base: AgentBase,
}

impl AnalyticalAgent {
    pub fn new(base: AgentBase) -> Self {
        Self { base }
    }

    /// Green phase with the highest pressure under `lanes_count`.
    pub fn choose_phase(&self, lanes_count: &BTreeMap<LaneId, usize>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for &phase in &self.base.green_phases {
            let p = self.base.phase_pressure(phase, lanes_count);
            match best {
                Some((_, bp)) if p <= bp => {}
                _ => best = Some((phase, p)),
            }
        }
        best.map(|(phase, _)| phase)
    }
}

impl Agent for AnalyticalAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Analytical
    }

    fn base(&self) -> &AgentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AgentBase {
        &mut self.base
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self.base.update_movements(ctx.lane_vehs);
        self.base.advance_clearing(ctx.engine, ctx.time);
        if !self.base.is_due(ctx.time) {
            return;
        }

        let waiting = ctx.engine.lane_waiting_vehicle_count();
        if ctx.time > 0 {
            let queue = self.base.queue_length(&waiting);
            self.base.total_rewards.push(-(queue as f64));
        }

        let Some(phase) = self.choose_phase(ctx.lanes_count) else {
            return;
        };
        let delay = self.base.request_phase(ctx.engine, ctx.time, phase);
        self.base.action_end_time = ctx.time + delay + self.base.action_freq;
        trace!(agent = %self.base.id, phase, time = ctx.time, "max-pressure phase");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Engine, GridEngine, GridSpec, Roadnet, SimConfig};

    #[test]
    fn test_chooses_loaded_approach() {
        let spec = GridSpec::default();
        let net = Roadnet::grid(&spec);
        let eng = GridEngine::new(&SimConfig::default(), net, Vec::new(), 1).unwrap();
        let info = eng.intersections()[0].clone();
        let agent = AnalyticalAgent::new(AgentBase::new(&info, 10, 2));

        // Load the incoming road served by the last green phase.
        let target = *info.green_phases().last().unwrap();
        let m = info.phases[target].movements[0];
        let mut counts = BTreeMap::new();
        for lane in &info.movements[m].in_lanes {
            counts.insert(lane.clone(), 8);
        }
        assert_eq!(agent.choose_phase(&counts), Some(target));
    }

    #[test]
    fn test_tie_goes_to_first_phase() {
        let spec = GridSpec::default();
        let net = Roadnet::grid(&spec);
        let eng = GridEngine::new(&SimConfig::default(), net, Vec::new(), 1).unwrap();
        let info = eng.intersections()[0].clone();
        let agent = AnalyticalAgent::new(AgentBase::new(&info, 10, 2));
        assert_eq!(
            agent.choose_phase(&BTreeMap::new()),
            info.green_phases().first().copied()
        );
    }
}
