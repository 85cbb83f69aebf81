// src/agent/movement.rs
//
// Per-movement vehicle bookkeeping at one intersection.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{LaneId, MovementInfo, RoadId, VehicleId};

#[derive(Debug, Clone)]
pub struct Movement {
    /// Index into the intersection's movement list.
    pub index: usize,
    pub in_road: RoadId,
    pub out_road: RoadId,
    pub in_lanes: Vec<LaneId>,
    pub out_lanes: Vec<LaneId>,
    /// Vehicles that appeared on the incoming lanes, per tick.
    pub arr_vehs_num: Vec<usize>,
    /// Vehicles that left the incoming lanes, per tick.
    pub dep_vehs_num: Vec<usize>,
    prev_vehs: BTreeSet<VehicleId>,
}

fn lane_sum(lanes: &[LaneId], counts: &BTreeMap<LaneId, usize>) -> usize {
    lanes.iter().map(|l| counts.get(l).copied().unwrap_or(0)).sum()
}

impl Movement {
    pub fn new(index: usize, info: &MovementInfo) -> Self {
        Self {
            index,
            in_road: info.in_road.clone(),
            out_road: info.out_road.clone(),
            in_lanes: info.in_lanes.clone(),
            out_lanes: info.out_lanes.clone(),
            arr_vehs_num: Vec::new(),
            dep_vehs_num: Vec::new(),
            prev_vehs: BTreeSet::new(),
        }
    }

    pub fn update_arr_dep(&mut self, lane_vehs: &BTreeMap<LaneId, Vec<VehicleId>>) {
        let current: BTreeSet<VehicleId> = self
            .in_lanes
            .iter()
            .filter_map(|l| lane_vehs.get(l))
            .flatten()
            .cloned()
            .collect();

        self.arr_vehs_num
            .push(current.difference(&self.prev_vehs).count());
        self.dep_vehs_num
            .push(self.prev_vehs.difference(&current).count());
        self.prev_vehs = current;
    }

    /// Vehicles on the incoming lanes.
    pub fn demand(&self, lanes_count: &BTreeMap<LaneId, usize>) -> usize {
        lane_sum(&self.in_lanes, lanes_count)
    }

    /// Vehicles on the outgoing lanes.
    pub fn downstream(&self, lanes_count: &BTreeMap<LaneId, usize>) -> usize {
        lane_sum(&self.out_lanes, lanes_count)
    }

    /// Incoming minus outgoing vehicles.
    pub fn pressure(&self, lanes_count: &BTreeMap<LaneId, usize>) -> f64 {
        self.demand(lanes_count) as f64 - self.downstream(lanes_count) as f64
    }

    pub fn total_arrivals(&self) -> usize {
        self.arr_vehs_num.iter().sum()
    }

    pub fn total_departures(&self) -> usize {
        self.dep_vehs_num.iter().sum()
    }

    pub fn reset(&mut self) {
        self.arr_vehs_num.clear();
        self.dep_vehs_num.clear();
        self.prev_vehs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement() -> Movement {
        Movement::new(
            0,
            &MovementInfo {
                in_road: "r_in".into(),
                out_road: "r_out".into(),
                in_lanes: vec!["r_in_0".into(), "r_in_1".into()],
                out_lanes: vec!["r_out_0".into()],
            },
        )
    }

    #[test]
    fn test_arrivals_and_departures() {
        let mut m = movement();
        let mut snap = BTreeMap::new();
        snap.insert("r_in_0".to_string(), vec!["a".to_string()]);
        snap.insert("r_in_1".to_string(), vec!["b".to_string()]);
        m.update_arr_dep(&snap);

        snap.insert("r_in_0".to_string(), vec![]);
        snap.insert("r_in_1".to_string(), vec!["b".to_string(), "c".to_string()]);
        m.update_arr_dep(&snap);

        assert_eq!(m.arr_vehs_num, vec![2, 1]);
        assert_eq!(m.dep_vehs_num, vec![0, 1]);

        m.reset();
        assert_eq!(m.total_arrivals(), 0);
        assert_eq!(m.total_departures(), 0);
    }

    #[test]
    fn test_pressure() {
        let m = movement();
        let mut counts = BTreeMap::new();
        counts.insert("r_in_0".to_string(), 3);
        counts.insert("r_in_1".to_string(), 2);
        counts.insert("r_out_0".to_string(), 4);
        assert_eq!(m.demand(&counts), 5);
        assert_eq!(m.pressure(&counts), 1.0);
    }
}
