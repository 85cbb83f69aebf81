// src/agent/fixed.rs
//
// Fixed-time controller: cycles the green phases in order, each held for a
// constant green time.

use tracing::trace;

use super::{Agent, AgentBase, StepContext};
use crate::config::AgentKind;

pub struct FixedAgent {
    base: AgentBase,
    green_time: u64,
    cursor: Option<usize>,
}

impl FixedAgent {
    pub fn new(base: AgentBase, green_time: u64) -> Self {
        Self {
            base,
            green_time: green_time.max(1),
            cursor: None,
        }
    }
}

impl Agent for FixedAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Fixed
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
        if !self.base.is_due(ctx.time) || self.base.green_phases.is_empty() {
            return;
        }

        if self.cursor.is_some() {
            let waiting = ctx.engine.lane_waiting_vehicle_count();
            let queue = self.base.queue_length(&waiting);
            self.base.total_rewards.push(-(queue as f64));
        }

        let next = self
            .cursor
            .map_or(0, |c| (c + 1) % self.base.green_phases.len());
        self.cursor = Some(next);
        let phase = self.base.green_phases[next];
        let delay = self.base.request_phase(ctx.engine, ctx.time, phase);
        self.base.action_end_time = ctx.time + delay + self.green_time;
        trace!(agent = %self.base.id, phase, time = ctx.time, "fixed phase");
    }

    fn reset_episode(&mut self) {
        self.base.reset_episode();
        self.cursor = None;
    }
}
