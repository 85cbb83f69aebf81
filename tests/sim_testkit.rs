// tests/sim_testkit.rs
//
// Scripted simulator engine for environment tests.
// Each tick replays one frame of (vehicle, speed) pairs on a single incoming
// lane of a two-approach intersection, and records every call the
// orchestration makes into it.
//
// Note: This module is included via #[path] from other test files.
// The dead_code warnings are suppressed because not all helpers
// are used in every test file that includes this module.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;

use traffic_rl::error::SimError;
use traffic_rl::sim::Engine;
use traffic_rl::types::{IntersectionInfo, LaneId, MovementInfo, PhaseInfo, VehicleId, VehicleInfo};

pub const INTERSECTION: &str = "i0";
pub const IN_LANE: &str = "in_0_0";

pub type Frame = Vec<(String, f64)>;

pub struct ScriptedEngine {
    frames: Vec<Frame>,
    tick: usize,
    pub phases_set: Vec<(String, usize)>,
    pub resets: Vec<bool>,
    pub distance_queries: Cell<usize>,
}

impl ScriptedEngine {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            tick: 0,
            phases_set: Vec::new(),
            resets: Vec::new(),
            distance_queries: Cell::new(0),
        }
    }

    /// No vehicles at all for `ticks` ticks.
    pub fn empty(ticks: usize) -> Self {
        Self::new(vec![Vec::new(); ticks])
    }

    fn frame(&self) -> &[(String, f64)] {
        self.frames.get(self.tick).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One speed series per vehicle turned into per-tick frames.
pub fn frames_from_series(series: &[(&'static str, &[f64])]) -> Vec<Frame> {
    let ticks = series.iter().map(|(_, s)| s.len()).max().unwrap_or(0);
    (0..ticks)
        .map(|t| {
            series
                .iter()
                .filter_map(|(id, s)| s.get(t).map(|&v| (id.to_string(), v)))
                .collect()
        })
        .collect()
}

fn lanes() -> [&'static str; 4] {
    [IN_LANE, "in_1_0", "out_0_0", "out_1_0"]
}

impl Engine for ScriptedEngine {
    fn vehicles(&self) -> Vec<VehicleId> {
        self.frame().iter().map(|(id, _)| id.clone()).collect()
    }

    fn vehicle_info(&self, id: &str) -> Option<VehicleInfo> {
        self.frame()
            .iter()
            .find(|(v, _)| v == id)
            .map(|&(_, speed)| VehicleInfo {
                speed,
                distance: 0.0,
                road: "in_0".into(),
                lane: IN_LANE.into(),
            })
    }

    fn lane_vehicles(&self) -> BTreeMap<LaneId, Vec<VehicleId>> {
        let mut m: BTreeMap<LaneId, Vec<VehicleId>> =
            lanes().iter().map(|l| (l.to_string(), Vec::new())).collect();
        if let Some(v) = m.get_mut(IN_LANE) {
            *v = self.vehicles();
        }
        m
    }

    fn lane_vehicle_count(&self) -> BTreeMap<LaneId, usize> {
        self.lane_vehicles()
            .into_iter()
            .map(|(l, v)| (l, v.len()))
            .collect()
    }

    fn lane_waiting_vehicle_count(&self) -> BTreeMap<LaneId, usize> {
        let mut m = self.lane_vehicle_count();
        let waiting = self.frame().iter().filter(|(_, s)| *s <= 0.1).count();
        m.insert(IN_LANE.to_string(), waiting);
        m
    }

    fn vehicle_distance(&self) -> BTreeMap<VehicleId, f64> {
        self.distance_queries.set(self.distance_queries.get() + 1);
        self.frame()
            .iter()
            .map(|(id, _)| (id.clone(), self.tick as f64))
            .collect()
    }

    fn lane_length(&self, _lane: &str) -> Option<f64> {
        Some(100.0)
    }

    fn intersections(&self) -> Vec<IntersectionInfo> {
        let movement = |k: usize| MovementInfo {
            in_road: format!("in_{k}"),
            out_road: format!("out_{k}"),
            in_lanes: vec![format!("in_{k}_0")],
            out_lanes: vec![format!("out_{k}_0")],
        };
        vec![IntersectionInfo {
            id: INTERSECTION.into(),
            in_roads: vec!["in_0".into(), "in_1".into()],
            out_roads: vec!["out_0".into(), "out_1".into()],
            movements: vec![movement(0), movement(1)],
            phases: vec![
                PhaseInfo { movements: vec![] },
                PhaseInfo { movements: vec![0] },
                PhaseInfo { movements: vec![1] },
            ],
        }]
    }

    fn set_phase(&mut self, intersection: &str, phase: usize) -> Result<(), SimError> {
        if intersection != INTERSECTION {
            return Err(SimError::UnknownIntersection(intersection.into()));
        }
        self.phases_set.push((intersection.into(), phase));
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.tick as f64
    }

    fn average_travel_time(&self) -> f64 {
        0.0
    }

    fn next_step(&mut self) {
        self.tick += 1;
    }

    fn reset(&mut self, reseed: bool) {
        self.tick = 0;
        self.resets.push(reseed);
    }
}
