// src/stops.rs
//
// Stop-event counting across ticks.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{VehicleId, STOP_SPEED_THRESHOLD};

/// Tracks which vehicles are currently stopped so that each transition into
/// the stopped state is counted once.
#[derive(Debug, Clone, Default)]
pub struct StopTracker {
    stopped: BTreeMap<VehicleId, bool>,
}

impl StopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one speed sample. Returns true when this sample is a new stop.
    pub fn observe(&mut self, id: &str, speed: f64) -> bool {
        if speed <= STOP_SPEED_THRESHOLD {
            if self.stopped.contains_key(id) {
                return false;
            }
            self.stopped.insert(id.to_string(), true);
            true
        } else {
            self.stopped.remove(id);
            false
        }
    }

    /// Forget vehicles that are no longer in the network.
    pub fn retain_present(&mut self, present: &BTreeSet<VehicleId>) {
        self.stopped.retain(|id, _| present.contains(id));
    }

    pub fn is_stopped(&self, id: &str) -> bool {
        self.stopped.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.stopped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty()
    }

    pub fn clear(&mut self) {
        self.stopped.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_stop_per_downward_crossing() {
        let mut t = StopTracker::new();
        let speeds = [5.0, 0.05, 0.0, 0.1, 0.2, 0.1, 0.0, 3.0];
        let stops: usize = speeds.iter().filter(|&&s| t.observe("v", s)).count();
        // 5.0 -> 0.05 and 0.2 -> 0.1
        assert_eq!(stops, 2);
        assert!(!t.is_stopped("v"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut t = StopTracker::new();
        assert!(t.observe("v", 0.1));
        assert!(t.is_stopped("v"));
    }

    #[test]
    fn test_retain_present_drops_departed() {
        let mut t = StopTracker::new();
        t.observe("a", 0.0);
        t.observe("b", 0.0);
        let present: BTreeSet<VehicleId> = ["b".to_string()].into_iter().collect();
        t.retain_present(&present);
        assert_eq!(t.len(), 1);
        assert!(t.is_stopped("b"));
    }
}
