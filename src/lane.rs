// src/lane.rs
//
// Per-lane arrival history and the macroscopic flow / density statistics
// derived from it (the two axes of a macroscopic fundamental diagram).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{LaneId, VehicleId};

/// Width of the sliding flow window, in ticks.
pub const FLOW_WINDOW: usize = 60;

#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    /// Physical length in metres.
    pub length: f64,
    /// Number of vehicles that entered the lane at each tick.
    pub arr_vehs_num: Vec<usize>,
    prev_vehs: BTreeSet<VehicleId>,
}

impl Lane {
    pub fn new(id: impl Into<LaneId>, length: f64) -> Self {
        Self {
            id: id.into(),
            length,
            arr_vehs_num: Vec::new(),
            prev_vehs: BTreeSet::new(),
        }
    }

    /// Record this tick's arrivals: vehicles on the lane now that were not on
    /// it at the previous tick. A lane missing from `lane_vehs` counts as empty.
    pub fn update_flow_data(&mut self, lane_vehs: &BTreeMap<LaneId, Vec<VehicleId>>) {
        let current: BTreeSet<VehicleId> = lane_vehs
            .get(&self.id)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default();

        let arrivals = current.difference(&self.prev_vehs).count();
        self.arr_vehs_num.push(arrivals);
        self.prev_vehs = current;
    }

    /// Vehicles per tick over the last [`FLOW_WINDOW`] ticks before `time`, or
    /// over `[0, time)` while fewer ticks have elapsed.
    pub fn flow(&self, time: usize) -> f64 {
        if time == 0 {
            return 0.0;
        }
        let (start, width) = if time >= FLOW_WINDOW {
            (time - FLOW_WINDOW, FLOW_WINDOW)
        } else {
            (0, time)
        };
        let end = time.min(self.arr_vehs_num.len());
        let start = start.min(end);
        let arrivals: usize = self.arr_vehs_num[start..end].iter().sum();
        arrivals as f64 / width as f64
    }

    /// Vehicles per metre.
    pub fn density(&self, lanes_count: &BTreeMap<LaneId, usize>) -> f64 {
        if self.length <= 0.0 {
            return 0.0;
        }
        lanes_count.get(&self.id).copied().unwrap_or(0) as f64 / self.length
    }

    pub fn reset(&mut self) {
        self.arr_vehs_num.clear();
        self.prev_vehs.clear();
    }
}

/// One point of the network fundamental diagram: lane-averaged density
/// (vehicles per metre) and flow (vehicles per tick) at a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MfdPoint {
    pub time: u64,
    pub density: f64,
    pub flow: f64,
}

impl MfdPoint {
    /// Average the per-lane samples of one tick. No lanes gives zeros.
    pub fn from_lanes(time: u64, flow: &[f64], density: &[f64]) -> Self {
        let mean = |xs: &[f64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        };
        Self {
            time,
            density: mean(density),
            flow: mean(flow),
        }
    }
}

/// Flow and density for every lane at `time`, in lane order.
pub fn mfd_data(
    time: usize,
    lanes_count: &BTreeMap<LaneId, usize>,
    lanes: &[Lane],
) -> (Vec<f64>, Vec<f64>) {
    lanes
        .iter()
        .map(|lane| (lane.flow(time), lane.density(lanes_count)))
        .unzip()
}
