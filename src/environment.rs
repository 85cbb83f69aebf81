// src/environment.rs
//
// Tick-level orchestration around a simulator engine.
//
// Per tick:
// 1) speed / stop bookkeeping
// 2) lane flow bookkeeping (+ optional MFD samples)
// 3) vehicle distances, only for families that consume them
// 4) agents stepped sequentially with the current exploration rate
// 5) exploration decay on its cadence
// 6) engine advance
//
// Nothing here can fail once constructed; all bookkeeping is best-effort.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::agent::{build_agents, Agent, StepContext};
use crate::config::{AgentKind, Config};
use crate::lane::{mfd_data, Lane, MfdPoint};
use crate::metrics::SeriesStats;
use crate::schedule::EpsilonSchedule;
use crate::sim::Engine;
use crate::stops::StopTracker;
use crate::types::VehicleId;

pub struct Environment<E: Engine> {
    engine: E,
    agents_type: AgentKind,
    agents: Vec<Box<dyn Agent>>,
    lanes: Vec<Lane>,
    stops: StopTracker,
    schedule: EpsilonSchedule,
    /// Mean vehicle speed per tick.
    speeds: Vec<f64>,
    /// New stop events per tick.
    stop_events: Vec<usize>,
    total_stops: usize,
    record_mfd: bool,
    mfd_flow: Vec<Vec<f64>>,
    mfd_density: Vec<Vec<f64>>,
    mfd_points: Vec<MfdPoint>,
}

impl<E: Engine> Environment<E> {
    /// Build lanes and agents for `engine`. Fails on an invalid config or an
    /// unreadable checkpoint.
    pub fn new(engine: E, cfg: &Config) -> anyhow::Result<Self> {
        cfg.validate()?;

        let lanes: Vec<Lane> = engine
            .lane_vehicles()
            .keys()
            .map(|id| Lane::new(id.clone(), engine.lane_length(id).unwrap_or(0.0)))
            .collect();
        let agents = build_agents(&engine, cfg)?;

        info!(
            lanes = lanes.len(),
            agents = agents.len(),
            kind = %cfg.agents_type,
            threads = engine.thread_count(),
            "environment ready"
        );

        Ok(Self {
            engine,
            agents_type: cfg.agents_type,
            agents,
            lanes,
            stops: StopTracker::new(),
            schedule: EpsilonSchedule::new(cfg.eps_start, cfg.eps_end, cfg.eps_decay, cfg.action_freq),
            speeds: Vec::new(),
            stop_events: Vec::new(),
            total_stops: 0,
            record_mfd: cfg.record_mfd,
            mfd_flow: Vec::new(),
            mfd_density: Vec::new(),
            mfd_points: Vec::new(),
        })
    }

    /// Advance one tick. `done` marks the final tick of the episode.
    pub fn step(&mut self, time: u64, done: bool) {
        self.update_speeds_and_stops();

        let lane_vehs = self.engine.lane_vehicles();
        let lanes_count = self.engine.lane_vehicle_count();
        for lane in &mut self.lanes {
            lane.update_flow_data(&lane_vehs);
        }
        if self.record_mfd {
            // arrivals at `time` are already recorded; window ends after them
            let (flow, density) = mfd_data(time as usize + 1, &lanes_count, &self.lanes);
            self.mfd_points.push(MfdPoint::from_lanes(time, &flow, &density));
            self.mfd_flow.push(flow);
            self.mfd_density.push(density);
        }

        let veh_distance = if self.agents_type.needs_vehicle_distance() {
            self.engine.vehicle_distance()
        } else {
            BTreeMap::new()
        };

        let eps = self.schedule.eps();
        {
            let mut ctx = StepContext {
                engine: &mut self.engine,
                time,
                lane_vehs: &lane_vehs,
                lanes_count: &lanes_count,
                veh_distance: &veh_distance,
                eps,
                done,
            };
            for agent in &mut self.agents {
                agent.step(&mut ctx);
            }
        }

        self.schedule.on_tick(time);
        self.engine.next_step();
    }

    fn update_speeds_and_stops(&mut self) {
        let ids: Vec<VehicleId> = self.engine.vehicles();
        let mut total = 0.0;
        let mut new_stops = 0;
        let mut seen = 0usize;

        for id in &ids {
            let Some(info) = self.engine.vehicle_info(id) else {
                continue;
            };
            seen += 1;
            total += info.speed;
            if self.stops.observe(id, info.speed) {
                new_stops += 1;
            }
        }
        self.stops.retain_present(&ids.into_iter().collect());

        let mean = if seen == 0 { 0.0 } else { total / seen as f64 };
        self.speeds.push(mean);
        self.stop_events.push(new_stops);
        self.total_stops += new_stops;
    }

    /// Prepare for a new episode. The engine keeps its random state; agents
    /// keep their learned weights. Exploration is not restarted.
    pub fn reset(&mut self) {
        self.engine.reset(false);
        for agent in &mut self.agents {
            agent.reset_episode();
        }
        for lane in &mut self.lanes {
            lane.reset();
        }
        self.stops.clear();
        self.speeds.clear();
        self.stop_events.clear();
        self.total_stops = 0;
        self.mfd_flow.clear();
        self.mfd_density.clear();
        self.mfd_points.clear();
        debug!("environment reset");
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn agents(&self) -> &[Box<dyn Agent>] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Box<dyn Agent>] {
        &mut self.agents
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn eps(&self) -> f64 {
        self.schedule.eps()
    }

    pub fn speeds(&self) -> &[f64] {
        &self.speeds
    }

    pub fn stop_events(&self) -> &[usize] {
        &self.stop_events
    }

    /// Stop events since the last reset.
    pub fn total_stops(&self) -> usize {
        self.total_stops
    }

    /// Vehicles currently tracked as stopped.
    pub fn stopped_now(&self) -> usize {
        self.stops.len()
    }

    pub fn speed_stats(&self) -> SeriesStats {
        self.speeds.iter().copied().collect()
    }

    /// Per-tick (flow, density) samples, one entry per lane, when recording.
    pub fn mfd(&self) -> (&[Vec<f64>], &[Vec<f64>]) {
        (&self.mfd_flow, &self.mfd_density)
    }

    /// Lane-averaged MFD point per recorded tick; empty unless recording.
    pub fn mfd_series(&self) -> &[MfdPoint] {
        &self.mfd_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ActionMode;
    use crate::sim::{GridEngine, GridSpec, Roadnet, SimConfig};

    fn env(kind: AgentKind) -> Environment<GridEngine> {
        let spec = GridSpec::default();
        let net = Roadnet::grid(&spec);
        let flows = net.grid_flows(&spec);
        let eng = GridEngine::new(&SimConfig::default(), net, flows, 1).unwrap();
        let cfg = Config {
            agents_type: kind,
            record_mfd: true,
            ..Config::default()
        };
        Environment::new(eng, &cfg).unwrap()
    }

    #[test]
    fn test_step_records_series() {
        let mut e = env(AgentKind::Analytical);
        for t in 0..30 {
            e.step(t, t == 29);
        }
        assert_eq!(e.speeds().len(), 30);
        assert_eq!(e.stop_events().len(), 30);
        assert_eq!(e.mfd().0.len(), 30);
        assert_eq!(e.mfd().0[0].len(), e.lanes().len());
        let series = e.mfd_series();
        assert_eq!(series.len(), 30);
        assert_eq!(series[29].time, 29);
        assert!(series.iter().all(|p| p.density >= 0.0 && p.flow >= 0.0));
        assert_eq!(e.engine().current_time(), 30.0);
        assert!(e.speeds().iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_eps_decays_to_floor() {
        let spec = GridSpec::default();
        let net = Roadnet::grid(&spec);
        let eng = GridEngine::new(&SimConfig::default(), net, Vec::new(), 1).unwrap();
        let cfg = Config {
            agents_type: AgentKind::Fixed,
            eps_start: 1.0,
            eps_end: 0.5,
            eps_decay: 0.1,
            action_freq: 10,
            ..Config::default()
        };
        let mut e = Environment::new(eng, &cfg).unwrap();
        let mut prev = e.eps();
        for t in 0..200 {
            e.step(t, false);
            assert!(e.eps() <= prev);
            assert!(e.eps() >= 0.5);
            prev = e.eps();
        }
        assert_eq!(e.eps(), 0.5);
    }

    #[test]
    fn test_reset_clears_rewards_and_mode() {
        let mut e = env(AgentKind::Learning);
        for t in 0..25 {
            e.step(t, false);
        }
        assert!(e.agents().iter().any(|a| !a.base().total_rewards.is_empty()));

        e.reset();
        for a in e.agents() {
            assert!(a.base().total_rewards.is_empty());
            assert_eq!(a.base().action_mode, ActionMode::Act);
        }
        assert!(e.speeds().is_empty());
        assert_eq!(e.total_stops(), 0);
        assert_eq!(e.engine().current_time(), 0.0);
    }
}
