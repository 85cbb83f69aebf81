// src/sim/roadnet.rs
//
// Serializable road network, flow and simulation config descriptions.
//
// - SimConfig: top-level JSON file pointing at a roadnet + flow file, or
//   carrying an inline `grid` generator block.
// - Roadnet:   intersections and directed roads; movements and default phases
//              are derived from it.
// - FlowSpec:  fixed-interval vehicle flows along a route of roads.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::types::{IntersectionInfo, MovementInfo, PhaseInfo, RoadId};

fn default_interval() -> f64 {
    1.0
}

fn default_lanes() -> usize {
    1
}

fn default_max_speed() -> f64 {
    11.111
}

fn default_end_time() -> f64 {
    -1.0
}

/// Top-level simulation config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    /// Seconds per tick.
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Seed for the engine's random generator.
    #[serde(default)]
    pub seed: u64,
    /// Directory prefix for `roadnet_file` / `flow_file`, relative to the
    /// config file's own directory.
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub roadnet_file: Option<String>,
    #[serde(default)]
    pub flow_file: Option<String>,
    /// Inline grid generator; takes precedence over `roadnet_file`.
    #[serde(default)]
    pub grid: Option<GridSpec>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            seed: 0,
            dir: String::new(),
            roadnet_file: None,
            flow_file: None,
            grid: Some(GridSpec::default()),
        }
    }
}

impl SimConfig {
    /// Read a config file and the roadnet / flows it refers to.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<(SimConfig, Roadnet, Vec<FlowSpec>)> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading sim config {}", path.display()))?;
        let cfg: SimConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing sim config {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new(".")).join(&cfg.dir);
        let (roadnet, flows) = cfg.resolve(&base)?;
        Ok((cfg, roadnet, flows))
    }

    /// Build the roadnet and flows, reading files relative to `base`.
    pub fn resolve(&self, base: &Path) -> anyhow::Result<(Roadnet, Vec<FlowSpec>)> {
        if let Some(grid) = &self.grid {
            let roadnet = Roadnet::grid(grid);
            let flows = roadnet.grid_flows(grid);
            return Ok((roadnet, flows));
        }

        let roadnet_file = self
            .roadnet_file
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("sim config has neither `grid` nor `roadnetFile`"))?;
        let roadnet_path = base.join(roadnet_file);
        let raw = fs::read_to_string(&roadnet_path)
            .with_context(|| format!("reading roadnet {}", roadnet_path.display()))?;
        let roadnet: Roadnet = serde_json::from_str(&raw)
            .with_context(|| format!("parsing roadnet {}", roadnet_path.display()))?;

        let flows = match &self.flow_file {
            Some(flow_file) => {
                let flow_path = base.join(flow_file);
                let raw = fs::read_to_string(&flow_path)
                    .with_context(|| format!("reading flows {}", flow_path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing flows {}", flow_path.display()))?
            }
            None => Vec::new(),
        };

        Ok((roadnet, flows))
    }
}

/// Parameters of a generated rows x cols grid with virtual boundary nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    #[serde(default = "GridSpec::default_road_length")]
    pub road_length: f64,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    /// Seconds between spawns on every boundary entry.
    #[serde(default = "GridSpec::default_flow_interval")]
    pub flow_interval: f64,
}

impl GridSpec {
    fn default_road_length() -> f64 {
        300.0
    }

    fn default_flow_interval() -> f64 {
        10.0
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            road_length: Self::default_road_length(),
            lanes: default_lanes(),
            max_speed: default_max_speed(),
            flow_interval: Self::default_flow_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionSpec {
    pub id: String,
    /// Boundary node: vehicles enter and leave here, no signal.
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    /// Explicit phases as lists of (in_road, out_road) pairs.
    #[serde(default)]
    pub phases: Option<Vec<Vec<(RoadId, RoadId)>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadSpec {
    pub id: RoadId,
    pub from: String,
    pub to: String,
    pub length: f64,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

impl RoadSpec {
    pub fn lane_ids(&self) -> Vec<String> {
        (0..self.lanes).map(|k| format!("{}_{}", self.id, k)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSpec {
    pub max_speed: f64,
    pub length: f64,
    pub min_gap: f64,
    pub max_pos_acc: f64,
}

impl Default for VehicleSpec {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            length: 5.0,
            min_gap: 2.5,
            max_pos_acc: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    pub route: Vec<RoadId>,
    /// Seconds between consecutive vehicles.
    pub interval: f64,
    #[serde(default)]
    pub start_time: f64,
    /// Last spawn time; negative means no end.
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    #[serde(default)]
    pub vehicle: VehicleSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadnet {
    pub intersections: Vec<IntersectionSpec>,
    pub roads: Vec<RoadSpec>,
}

const DIRECTIONS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

fn node_id(x: i64, y: i64) -> String {
    format!("intersection_{x}_{y}")
}

fn road_id(x: i64, y: i64, dir: usize) -> String {
    format!("road_{x}_{y}_{dir}")
}

impl Roadnet {
    /// Generate a grid of `rows x cols` signalised intersections surrounded by
    /// virtual boundary nodes (corners omitted). Road `road_{x}_{y}_{d}`
    /// leaves `intersection_{x}_{y}` in direction d (0=E, 1=N, 2=W, 3=S).
    pub fn grid(spec: &GridSpec) -> Roadnet {
        let (w, h) = (spec.cols as i64 + 1, spec.rows as i64 + 1);
        let is_corner = |x: i64, y: i64| (x == 0 || x == w) && (y == 0 || y == h);
        let is_virtual = |x: i64, y: i64| x == 0 || x == w || y == 0 || y == h;
        let exists = |x: i64, y: i64| (0..=w).contains(&x) && (0..=h).contains(&y) && !is_corner(x, y);

        let mut intersections = Vec::new();
        let mut roads = Vec::new();

        for y in 0..=h {
            for x in 0..=w {
                if !exists(x, y) {
                    continue;
                }
                intersections.push(IntersectionSpec {
                    id: node_id(x, y),
                    is_virtual: is_virtual(x, y),
                    phases: None,
                });

                for (dir, (dx, dy)) in DIRECTIONS.iter().enumerate() {
                    let (nx, ny) = (x + dx, y + dy);
                    if !exists(nx, ny) || (is_virtual(x, y) && is_virtual(nx, ny)) {
                        continue;
                    }
                    roads.push(RoadSpec {
                        id: road_id(x, y, dir),
                        from: node_id(x, y),
                        to: node_id(nx, ny),
                        length: spec.road_length,
                        lanes: spec.lanes.max(1),
                        max_speed: spec.max_speed,
                    });
                }
            }
        }

        Roadnet {
            intersections,
            roads,
        }
    }

    /// Straight-through flows from every boundary entry to the opposite side.
    pub fn grid_flows(&self, spec: &GridSpec) -> Vec<FlowSpec> {
        let (w, h) = (spec.cols as i64 + 1, spec.rows as i64 + 1);
        let mut entries = Vec::new();
        for y in 1..h {
            entries.push((0, y, 0usize));
            entries.push((w, y, 2usize));
        }
        for x in 1..w {
            entries.push((x, 0, 1usize));
            entries.push((x, h, 3usize));
        }

        entries
            .into_iter()
            .map(|(sx, sy, dir)| {
                let (dx, dy) = DIRECTIONS[dir];
                let mut route = Vec::new();
                let (mut x, mut y) = (sx, sy);
                loop {
                    route.push(road_id(x, y, dir));
                    x += dx;
                    y += dy;
                    if x <= 0 || x >= w || y <= 0 || y >= h {
                        break;
                    }
                }
                FlowSpec {
                    route,
                    interval: spec.flow_interval,
                    start_time: 0.0,
                    end_time: -1.0,
                    vehicle: VehicleSpec {
                        max_speed: spec.max_speed,
                        ..VehicleSpec::default()
                    },
                }
            })
            .collect()
    }

    pub fn road(&self, id: &str) -> Option<&RoadSpec> {
        self.roads.iter().find(|r| r.id == id)
    }

    /// Check references between roads, intersections and flow routes.
    pub fn validate(&self, flows: &[FlowSpec]) -> Result<(), SimError> {
        let ids: BTreeSet<&str> = self.intersections.iter().map(|i| i.id.as_str()).collect();
        if ids.len() != self.intersections.len() {
            return Err(SimError::InvalidRoadnet("duplicate intersection id".into()));
        }

        let mut road_ids = BTreeSet::new();
        for road in &self.roads {
            if !road_ids.insert(road.id.as_str()) {
                return Err(SimError::InvalidRoadnet(format!("duplicate road {}", road.id)));
            }
            if !ids.contains(road.from.as_str()) || !ids.contains(road.to.as_str()) {
                return Err(SimError::InvalidRoadnet(format!(
                    "road {} references an unknown intersection",
                    road.id
                )));
            }
            if !(road.length > 0.0) || road.lanes == 0 || !(road.max_speed > 0.0) {
                return Err(SimError::InvalidRoadnet(format!(
                    "road {} needs positive length, lanes and max speed",
                    road.id
                )));
            }
        }

        let virtual_ids: BTreeSet<&str> = self
            .intersections
            .iter()
            .filter(|i| i.is_virtual)
            .map(|i| i.id.as_str())
            .collect();
        for (i, flow) in flows.iter().enumerate() {
            if flow.route.is_empty() || !(flow.interval > 0.0) {
                return Err(SimError::InvalidRoadnet(format!(
                    "flow {i} needs a non-empty route and a positive interval"
                )));
            }
            let mut prev: Option<&RoadSpec> = None;
            for rid in &flow.route {
                let road = self.road(rid).ok_or_else(|| {
                    SimError::InvalidRoadnet(format!("flow {i} uses unknown road {rid}"))
                })?;
                if let Some(p) = prev {
                    if p.to != road.from {
                        return Err(SimError::InvalidRoadnet(format!(
                            "flow {i}: road {} does not continue from {}",
                            road.id, p.id
                        )));
                    }
                    if road.to == p.from {
                        return Err(SimError::InvalidRoadnet(format!(
                            "flow {i}: u-turn from {} onto {}",
                            p.id, road.id
                        )));
                    }
                    if virtual_ids.contains(road.from.as_str()) {
                        return Err(SimError::InvalidRoadnet(format!(
                            "flow {i} passes through virtual node {}",
                            road.from
                        )));
                    }
                }
                prev = Some(road);
            }
        }

        Ok(())
    }

    /// Derive movements and phases for every non-virtual intersection.
    pub fn intersection_infos(&self) -> Result<Vec<IntersectionInfo>, SimError> {
        let mut infos = Vec::new();

        for node in self.intersections.iter().filter(|i| !i.is_virtual) {
            let in_roads: Vec<&RoadSpec> = self.roads.iter().filter(|r| r.to == node.id).collect();
            let out_roads: Vec<&RoadSpec> =
                self.roads.iter().filter(|r| r.from == node.id).collect();

            let mut movements = Vec::new();
            let mut index: BTreeMap<(&str, &str), usize> = BTreeMap::new();
            for rin in &in_roads {
                for rout in &out_roads {
                    if rout.to == rin.from {
                        continue;
                    }
                    index.insert((rin.id.as_str(), rout.id.as_str()), movements.len());
                    movements.push(MovementInfo {
                        in_road: rin.id.clone(),
                        out_road: rout.id.clone(),
                        in_lanes: rin.lane_ids(),
                        out_lanes: rout.lane_ids(),
                    });
                }
            }

            let phases = match &node.phases {
                Some(explicit) => explicit
                    .iter()
                    .map(|pairs| {
                        let movements = pairs
                            .iter()
                            .map(|(a, b)| {
                                index.get(&(a.as_str(), b.as_str())).copied().ok_or_else(|| {
                                    SimError::InvalidRoadnet(format!(
                                        "phase at {} references unknown movement {a} -> {b}",
                                        node.id
                                    ))
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(PhaseInfo { movements })
                    })
                    .collect::<Result<Vec<_>, SimError>>()?,
                None => {
                    let mut phases = vec![PhaseInfo { movements: Vec::new() }];
                    for rin in &in_roads {
                        let ms: Vec<usize> = movements
                            .iter()
                            .enumerate()
                            .filter(|(_, m)| m.in_road == rin.id)
                            .map(|(k, _)| k)
                            .collect();
                        if !ms.is_empty() {
                            phases.push(PhaseInfo { movements: ms });
                        }
                    }
                    phases
                }
            };

            if phases.is_empty() {
                return Err(SimError::InvalidRoadnet(format!(
                    "intersection {} has no phases",
                    node.id
                )));
            }

            infos.push(IntersectionInfo {
                id: node.id.clone(),
                in_roads: in_roads.iter().map(|r| r.id.clone()).collect(),
                out_roads: out_roads.iter().map(|r| r.id.clone()).collect(),
                movements,
                phases,
            });
        }

        Ok(infos)
    }
}
