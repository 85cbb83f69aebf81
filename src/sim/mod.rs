// src/sim/mod.rs
//
// Simulator engine interface.
//
// The orchestration code only ever talks to the traffic simulator through the
// `Engine` trait: vehicle and lane queries, topology queries, signal control,
// tick advance and reset. `GridEngine` is the in-crate implementation used by
// the binary and the tests.

use std::collections::BTreeMap;

use crate::error::SimError;
use crate::types::{IntersectionInfo, LaneId, VehicleId, VehicleInfo};

pub mod grid;
pub mod roadnet;

pub use grid::GridEngine;
pub use roadnet::{FlowSpec, GridSpec, IntersectionSpec, RoadSpec, Roadnet, SimConfig, VehicleSpec};

/// Handle to a microscopic traffic simulator.
///
/// All queries are snapshots of the current tick; `next_step` is the only
/// call that advances simulated time.
pub trait Engine {
    /// Ids of all vehicles currently running in the network.
    fn vehicles(&self) -> Vec<VehicleId>;

    fn vehicle_info(&self, id: &str) -> Option<VehicleInfo>;

    /// Vehicles on every lane, front of the lane first. Empty lanes are included.
    fn lane_vehicles(&self) -> BTreeMap<LaneId, Vec<VehicleId>>;

    fn lane_vehicle_count(&self) -> BTreeMap<LaneId, usize>;

    /// Vehicles per lane whose speed is at or below the stop threshold.
    fn lane_waiting_vehicle_count(&self) -> BTreeMap<LaneId, usize>;

    /// Cumulative distance travelled by each running vehicle.
    fn vehicle_distance(&self) -> BTreeMap<VehicleId, f64>;

    fn lane_length(&self, lane: &str) -> Option<f64>;

    /// Controllable intersections with their movements and phases.
    fn intersections(&self) -> Vec<IntersectionInfo>;

    fn set_phase(&mut self, intersection: &str, phase: usize) -> Result<(), SimError>;

    /// Simulated time in seconds.
    fn current_time(&self) -> f64;

    /// Mean travel time over finished and running vehicles.
    fn average_travel_time(&self) -> f64;

    /// Worker-thread count the engine was constructed with.
    fn thread_count(&self) -> usize {
        1
    }

    fn next_step(&mut self);

    /// Clear all simulation state. With `reseed == false` the random
    /// generator keeps its current state.
    fn reset(&mut self, reseed: bool);
}
