// src/types.rs
//
// Common shared types for the simulator interface and the agents.

use serde::{Deserialize, Serialize};

pub type VehicleId = String;
pub type LaneId = String;
pub type RoadId = String;
pub type IntersectionId = String;

/// Speed at or below which a vehicle counts as stopped (m/s).
pub const STOP_SPEED_THRESHOLD: f64 = 0.1;

/// Per-vehicle snapshot returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    /// Current speed in m/s.
    pub speed: f64,
    /// Cumulative distance travelled since the vehicle entered (m).
    pub distance: f64,
    pub road: RoadId,
    pub lane: LaneId,
}

/// One (incoming road, outgoing road) pair through an intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementInfo {
    pub in_road: RoadId,
    pub out_road: RoadId,
    pub in_lanes: Vec<LaneId>,
    pub out_lanes: Vec<LaneId>,
}

/// A signal phase: the set of movements (by index) that have right of way.
///
/// An empty set is the all-red clearing phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub movements: Vec<usize>,
}

impl PhaseInfo {
    pub fn is_clearing(&self) -> bool {
        self.movements.is_empty()
    }
}

/// Topology of one controllable intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionInfo {
    pub id: IntersectionId,
    pub in_roads: Vec<RoadId>,
    pub out_roads: Vec<RoadId>,
    pub movements: Vec<MovementInfo>,
    pub phases: Vec<PhaseInfo>,
}

impl IntersectionInfo {
    /// Index of the first all-red phase, if the intersection has one.
    pub fn clearing_phase(&self) -> Option<usize> {
        self.phases.iter().position(PhaseInfo::is_clearing)
    }

    /// Indices of phases that grant right of way to at least one movement.
    pub fn green_phases(&self) -> Vec<usize> {
        self.phases
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_clearing())
            .map(|(i, _)| i)
            .collect()
    }
}
