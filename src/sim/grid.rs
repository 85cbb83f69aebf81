// src/sim/grid.rs
//
// GridEngine: a compact seeded microscopic simulator.
//
// Per tick:
//  1) spawn vehicles whose flow is due (queued until the entry lane has room),
//  2) move every lane front to back with gap-limited kinematics,
//  3) hand vehicles at the stop line to the next road if their movement is
//     green and the target lane has room; vehicles on their last road leave.
//
// No lane changing and no routing; one vehicle per lane may cross per tick.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::error::SimError;
use crate::types::{
    IntersectionInfo, LaneId, VehicleId, VehicleInfo, STOP_SPEED_THRESHOLD,
};

use super::roadnet::{FlowSpec, Roadnet, SimConfig, VehicleSpec};
use super::Engine;

#[derive(Debug, Clone)]
struct Road {
    id: String,
    length: f64,
    max_speed: f64,
    lanes: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Lane {
    id: LaneId,
    road: usize,
    /// Vehicle ids, front of the lane first.
    queue: VecDeque<VehicleId>,
}

#[derive(Debug, Clone)]
struct Vehicle {
    route: Vec<usize>,
    route_pos: usize,
    lane: usize,
    pos: f64,
    speed: f64,
    distance: f64,
    enter_time: f64,
    spec: VehicleSpec,
}

#[derive(Debug, Clone)]
struct Signal {
    info: IntersectionInfo,
    /// (in_road, out_road) road indices per movement.
    movement_roads: Vec<(usize, usize)>,
    current: usize,
}

#[derive(Debug, Clone)]
struct Flow {
    spec: FlowSpec,
    route: Vec<usize>,
    next_time: f64,
    spawned: u64,
}

/// Seeded grid simulator implementing [`Engine`].
pub struct GridEngine {
    interval: f64,
    seed: u64,
    threads: usize,
    roads: Vec<Road>,
    lanes: Vec<Lane>,
    lane_index: BTreeMap<LaneId, usize>,
    signals: Vec<Signal>,
    flows: Vec<Flow>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    pending: VecDeque<(VehicleId, Vehicle)>,
    /// Green (in_road, out_road) pairs for the current phases.
    green: BTreeSet<(usize, usize)>,
    time: f64,
    finished: u64,
    finished_travel_time: f64,
    rng: ChaCha8Rng,
}

impl GridEngine {
    /// Load a simulation config file and build the engine.
    pub fn from_config_file(path: impl AsRef<Path>, threads: usize) -> anyhow::Result<Self> {
        let (cfg, roadnet, flows) = SimConfig::load(path)?;
        Ok(Self::new(&cfg, roadnet, flows, threads)?)
    }

    pub fn new(
        cfg: &SimConfig,
        roadnet: Roadnet,
        flows: Vec<FlowSpec>,
        threads: usize,
    ) -> Result<Self, SimError> {
        roadnet.validate(&flows)?;
        if !(cfg.interval > 0.0) {
            return Err(SimError::InvalidRoadnet("interval must be positive".into()));
        }

        let mut roads = Vec::with_capacity(roadnet.roads.len());
        let mut lanes = Vec::new();
        let mut lane_index = BTreeMap::new();
        let mut road_index = BTreeMap::new();

        for spec in &roadnet.roads {
            let ridx = roads.len();
            road_index.insert(spec.id.clone(), ridx);
            let mut lane_ids = Vec::with_capacity(spec.lanes);
            for id in spec.lane_ids() {
                lane_index.insert(id.clone(), lanes.len());
                lane_ids.push(lanes.len());
                lanes.push(Lane {
                    id,
                    road: ridx,
                    queue: VecDeque::new(),
                });
            }
            roads.push(Road {
                id: spec.id.clone(),
                length: spec.length,
                max_speed: spec.max_speed,
                lanes: lane_ids,
            });
        }

        let signals = roadnet
            .intersection_infos()?
            .into_iter()
            .map(|info| {
                let movement_roads = info
                    .movements
                    .iter()
                    .map(|m| (road_index[&m.in_road], road_index[&m.out_road]))
                    .collect();
                Signal {
                    info,
                    movement_roads,
                    current: 0,
                }
            })
            .collect();

        let flows = flows
            .into_iter()
            .map(|spec| Flow {
                route: spec.route.iter().map(|r| road_index[r]).collect(),
                next_time: spec.start_time,
                spawned: 0,
                spec,
            })
            .collect();

        let mut engine = Self {
            interval: cfg.interval,
            seed: cfg.seed,
            threads: threads.max(1),
            roads,
            lanes,
            lane_index,
            signals,
            flows,
            vehicles: BTreeMap::new(),
            pending: VecDeque::new(),
            green: BTreeSet::new(),
            time: 0.0,
            finished: 0,
            finished_travel_time: 0.0,
            rng: ChaCha8Rng::seed_from_u64(cfg.seed),
        };
        engine.refresh_green();
        Ok(engine)
    }

    /// Vehicles spawned but still waiting for room on their entry lane.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Vehicles that completed their route since the last reset.
    pub fn finished_count(&self) -> u64 {
        self.finished
    }

    /// Current phase of an intersection.
    pub fn phase(&self, intersection: &str) -> Option<usize> {
        self.signals
            .iter()
            .find(|s| s.info.id == intersection)
            .map(|s| s.current)
    }

    fn refresh_green(&mut self) {
        self.green.clear();
        for s in &self.signals {
            for &m in &s.info.phases[s.current].movements {
                self.green.insert(s.movement_roads[m]);
            }
        }
    }

    /// Free space at the entry of a lane for a vehicle with the given min gap.
    fn entry_room(&self, lane: usize, min_gap: f64) -> f64 {
        match self.lanes[lane].queue.back() {
            Some(last) => {
                let v = &self.vehicles[last];
                v.pos - v.spec.length - min_gap
            }
            None => self.roads[self.lanes[lane].road].length,
        }
    }

    /// Lane of `road` with the most entry room; ties broken at random.
    fn best_entry_lane(&mut self, road: usize, min_gap: f64) -> Option<(usize, f64)> {
        let candidates: Vec<(usize, f64)> = self.roads[road]
            .lanes
            .iter()
            .map(|&l| (l, self.entry_room(l, min_gap)))
            .collect();
        let best = candidates
            .iter()
            .map(|&(_, room)| room)
            .fold(f64::NEG_INFINITY, f64::max);
        if best < 0.0 {
            return None;
        }
        let ties: Vec<(usize, f64)> = candidates
            .into_iter()
            .filter(|&(_, room)| room >= best)
            .collect();
        let pick = if ties.len() > 1 {
            self.rng.gen_range(0..ties.len())
        } else {
            0
        };
        Some(ties[pick])
    }

    fn spawn_due(&mut self) {
        let now = self.time;
        for (fi, flow) in self.flows.iter_mut().enumerate() {
            while flow.next_time <= now + 1e-9
                && (flow.spec.end_time < 0.0 || flow.next_time <= flow.spec.end_time + 1e-9)
            {
                let id = format!("flow_{}_{}", fi, flow.spawned);
                flow.spawned += 1;
                flow.next_time += flow.spec.interval;
                self.pending.push_back((
                    id,
                    Vehicle {
                        route: flow.route.clone(),
                        route_pos: 0,
                        lane: 0,
                        pos: 0.0,
                        speed: 0.0,
                        distance: 0.0,
                        enter_time: now,
                        spec: flow.spec.vehicle.clone(),
                    },
                ));
            }
        }

        let mut still_waiting = VecDeque::with_capacity(self.pending.len());
        while let Some((id, mut veh)) = self.pending.pop_front() {
            let road = veh.route[0];
            match self.best_entry_lane(road, veh.spec.min_gap) {
                Some((lane, room)) => {
                    let road_max = self.roads[road].max_speed;
                    veh.lane = lane;
                    veh.speed = veh
                        .spec
                        .max_speed
                        .min(road_max)
                        .min(room.max(0.0) / self.interval);
                    self.lanes[lane].queue.push_back(id.clone());
                    self.vehicles.insert(id, veh);
                }
                None => still_waiting.push_back((id, veh)),
            }
        }
        self.pending = still_waiting;
    }

    /// Distance a lane-front vehicle may cover before it has to stop.
    fn stop_line_gap(&self, veh: &Vehicle, lane_len: f64) -> f64 {
        let to_line = lane_len - veh.pos;
        if veh.route_pos + 1 >= veh.route.len() {
            return f64::INFINITY;
        }
        let here = veh.route[veh.route_pos];
        let next = veh.route[veh.route_pos + 1];
        if !self.green.contains(&(here, next)) {
            return to_line;
        }
        let room = self.roads[next]
            .lanes
            .iter()
            .map(|&l| self.entry_room(l, veh.spec.min_gap))
            .fold(f64::NEG_INFINITY, f64::max);
        to_line + room.max(0.0)
    }

    fn move_vehicles(&mut self) -> Vec<VehicleId> {
        let dt = self.interval;
        let mut at_line = Vec::new();

        for li in 0..self.lanes.len() {
            let road = &self.roads[self.lanes[li].road];
            let (lane_len, road_max) = (road.length, road.max_speed);
            let ids: Vec<VehicleId> = self.lanes[li].queue.iter().cloned().collect();

            // (rear position, length, reached the stop line) of the vehicle ahead.
            let mut ahead: Option<(f64, f64, bool)> = None;

            for id in ids {
                let Some(veh) = self.vehicles.get(&id) else {
                    continue;
                };
                let gap = match ahead {
                    None => self.stop_line_gap(veh, lane_len),
                    // The leader may still be held at the line, so stay behind it.
                    Some((_, len, true)) => lane_len - len - veh.spec.min_gap - veh.pos,
                    Some((rear, _, false)) => rear - veh.spec.min_gap - veh.pos,
                };

                let speed = (veh.speed + veh.spec.max_pos_acc * dt)
                    .min(veh.spec.max_speed)
                    .min(road_max)
                    .min(gap.max(0.0) / dt)
                    .max(0.0);

                if let Some(veh) = self.vehicles.get_mut(&id) {
                    veh.speed = speed;
                    veh.pos += speed * dt;
                    veh.distance += speed * dt;

                    let crossed = veh.pos >= lane_len - 1e-9;
                    ahead = Some((veh.pos - veh.spec.length, veh.spec.length, crossed));
                    if crossed {
                        at_line.push(id);
                    }
                }
            }
        }

        at_line
    }

    fn transfer(&mut self, at_line: Vec<VehicleId>) {
        let finish_time = self.time + self.interval;

        for id in at_line {
            let Some((lane, route_pos, route_len)) = self
                .vehicles
                .get(&id)
                .map(|v| (v.lane, v.route_pos, v.route.len()))
            else {
                continue;
            };
            let lane_len = self.roads[self.lanes[lane].road].length;

            if route_pos + 1 >= route_len {
                self.lanes[lane].queue.retain(|v| v != &id);
                if let Some(v) = self.vehicles.remove(&id) {
                    self.finished += 1;
                    self.finished_travel_time += finish_time - v.enter_time;
                    debug!(vehicle = %id, travel_time = finish_time - v.enter_time, "vehicle finished");
                }
                continue;
            }

            let (here, next, min_gap) = {
                let v = &self.vehicles[&id];
                (v.route[route_pos], v.route[route_pos + 1], v.spec.min_gap)
            };
            let target = if self.green.contains(&(here, next)) {
                self.best_entry_lane(next, min_gap)
            } else {
                None
            };

            let Some(veh) = self.vehicles.get_mut(&id) else {
                continue;
            };
            match target {
                Some((new_lane, room)) => {
                    let overshoot = (veh.pos - lane_len).max(0.0);
                    veh.pos = overshoot.min(room);
                    veh.lane = new_lane;
                    veh.route_pos += 1;
                    self.lanes[lane].queue.retain(|v| v != &id);
                    self.lanes[new_lane].queue.push_back(id);
                }
                None => {
                    veh.pos = lane_len;
                    veh.speed = 0.0;
                }
            }
        }
    }
}

impl Engine for GridEngine {
    fn vehicles(&self) -> Vec<VehicleId> {
        self.vehicles.keys().cloned().collect()
    }

    fn vehicle_info(&self, id: &str) -> Option<VehicleInfo> {
        self.vehicles.get(id).map(|v| {
            let lane = &self.lanes[v.lane];
            VehicleInfo {
                speed: v.speed,
                distance: v.distance,
                road: self.roads[lane.road].id.clone(),
                lane: lane.id.clone(),
            }
        })
    }

    fn lane_vehicles(&self) -> BTreeMap<LaneId, Vec<VehicleId>> {
        self.lanes
            .iter()
            .map(|l| (l.id.clone(), l.queue.iter().cloned().collect()))
            .collect()
    }

    fn lane_vehicle_count(&self) -> BTreeMap<LaneId, usize> {
        self.lanes
            .iter()
            .map(|l| (l.id.clone(), l.queue.len()))
            .collect()
    }

    fn lane_waiting_vehicle_count(&self) -> BTreeMap<LaneId, usize> {
        self.lanes
            .iter()
            .map(|l| {
                let waiting = l
                    .queue
                    .iter()
                    .filter(|id| self.vehicles[*id].speed <= STOP_SPEED_THRESHOLD)
                    .count();
                (l.id.clone(), waiting)
            })
            .collect()
    }

    fn vehicle_distance(&self) -> BTreeMap<VehicleId, f64> {
        self.vehicles
            .iter()
            .map(|(id, v)| (id.clone(), v.distance))
            .collect()
    }

    fn lane_length(&self, lane: &str) -> Option<f64> {
        self.lane_index
            .get(lane)
            .map(|&l| self.roads[self.lanes[l].road].length)
    }

    fn intersections(&self) -> Vec<IntersectionInfo> {
        self.signals.iter().map(|s| s.info.clone()).collect()
    }

    fn set_phase(&mut self, intersection: &str, phase: usize) -> Result<(), SimError> {
        let signal = self
            .signals
            .iter_mut()
            .find(|s| s.info.id == intersection)
            .ok_or_else(|| SimError::UnknownIntersection(intersection.to_string()))?;
        let num_phases = signal.info.phases.len();
        if phase >= num_phases {
            return Err(SimError::PhaseOutOfRange {
                intersection: intersection.to_string(),
                phase,
                num_phases,
            });
        }
        if signal.current != phase {
            signal.current = phase;
            self.refresh_green();
        }
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn average_travel_time(&self) -> f64 {
        let running: f64 = self.vehicles.values().map(|v| self.time - v.enter_time).sum();
        let n = self.finished as f64 + self.vehicles.len() as f64;
        if n == 0.0 {
            0.0
        } else {
            (self.finished_travel_time + running) / n
        }
    }

    fn thread_count(&self) -> usize {
        self.threads
    }

    fn next_step(&mut self) {
        self.spawn_due();
        let at_line = self.move_vehicles();
        self.transfer(at_line);
        self.time += self.interval;
    }

    fn reset(&mut self, reseed: bool) {
        self.vehicles.clear();
        self.pending.clear();
        for lane in &mut self.lanes {
            lane.queue.clear();
        }
        for flow in &mut self.flows {
            flow.next_time = flow.spec.start_time;
            flow.spawned = 0;
        }
        for s in &mut self.signals {
            s.current = 0;
        }
        self.refresh_green();
        self.time = 0.0;
        self.finished = 0;
        self.finished_travel_time = 0.0;
        if reseed {
            self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        }
    }
}
