// src/config.rs
//
// Central run configuration: simulator handle, learning hyperparameters,
// exploration schedule and the agent-family selector.
//
// Precedence (highest to lowest):
// 1. CLI arguments (applied by the binary)
// 2. TRAFFIC_RL_* environment variables
// 3. Defaults below

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::rl::DqnConfig;

/// Agent families that can be attached to intersections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Fixed-time cycling through phases.
    Fixed,
    /// Max-pressure phase selection.
    Analytical,
    /// DQN with a queue-length reward.
    Learning,
    /// DQN with a pressure reward.
    Presslight,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Fixed,
        AgentKind::Analytical,
        AgentKind::Learning,
        AgentKind::Presslight,
    ];

    /// Stable lowercase name (CLI value, logs, checkpoints).
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Fixed => "fixed",
            AgentKind::Analytical => "analytical",
            AgentKind::Learning => "learning",
            AgentKind::Presslight => "presslight",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(AgentKind::as_str).collect()
    }

    /// Families that train a Q-network.
    pub fn is_learning(&self) -> bool {
        matches!(self, AgentKind::Learning | AgentKind::Presslight)
    }

    /// Families whose agents consume per-vehicle distances each tick.
    pub fn needs_vehicle_distance(&self) -> bool {
        self.is_learning()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownAgentType {
                given: s.to_string(),
                valid: Self::names(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Simulation config file. None runs the built-in 2x2 grid.
    pub sim_config: Option<PathBuf>,
    pub num_episodes: usize,
    /// Ticks per episode.
    pub num_sim_steps: u64,
    /// Ticks between network updates.
    pub update_freq: u64,
    pub batch_size: usize,
    pub eps_start: f64,
    pub eps_end: f64,
    /// Linear decrement applied every `action_freq` ticks.
    pub eps_decay: f64,
    pub lr: f64,
    pub gamma: f64,
    pub agents_type: AgentKind,
    /// Ticks between agent decisions; also the epsilon decay cadence.
    pub action_freq: u64,
    /// All-red ticks inserted between two different green phases.
    pub clearing_time: u64,
    /// Green time per phase for fixed-time agents.
    pub fixed_phase_time: u64,
    /// Pre-trained weights loaded into every learning agent.
    pub load: Option<PathBuf>,
    /// Directory for per-agent checkpoints written after training.
    pub save_dir: Option<PathBuf>,
    /// JSONL file receiving one summary line per episode.
    pub log_path: Option<PathBuf>,
    pub seed: u64,
    /// Worker threads handed to the simulator engine.
    pub threads: usize,
    /// Record per-lane flow/density samples every tick.
    pub record_mfd: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sim_config: None,
            num_episodes: 1,
            num_sim_steps: 1800,
            update_freq: 10,
            batch_size: 64,
            eps_start: 1.0,
            eps_end: 0.01,
            eps_decay: 5e-5,
            lr: 5e-4,
            gamma: 0.8,
            agents_type: AgentKind::Analytical,
            action_freq: 10,
            clearing_time: 2,
            fixed_phase_time: 20,
            load: None,
            save_dir: None,
            log_path: None,
            seed: 2,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            record_mfd: false,
        }
    }
}

/// Apply `TRAFFIC_RL_<name>` to `target` if set and parseable.
fn override_from_env<T>(name: &str, target: &mut T)
where
    T: FromStr + fmt::Debug,
{
    let var = format!("TRAFFIC_RL_{name}");
    if let Ok(raw) = env::var(&var) {
        match raw.parse::<T>() {
            Ok(v) => {
                info!(%var, value = ?v, "config override from environment");
                *target = v;
            }
            Err(_) => {
                warn!(%var, raw = %raw, default = ?target, "could not parse override; keeping default");
            }
        }
    }
}

impl Config {
    /// Defaults with `TRAFFIC_RL_*` environment overrides applied.
    ///
    /// Recognised variables: EPISODES, SIM_STEPS, UPDATE_FREQ, BATCH_SIZE,
    /// EPS_START, EPS_END, EPS_DECAY, LR, GAMMA, AGENTS_TYPE, SEED, THREADS.
    /// Values that fail to parse are ignored with a warning.
    pub fn from_env_or_default() -> Self {
        let mut cfg = Config::default();
        override_from_env("EPISODES", &mut cfg.num_episodes);
        override_from_env("SIM_STEPS", &mut cfg.num_sim_steps);
        override_from_env("UPDATE_FREQ", &mut cfg.update_freq);
        override_from_env("BATCH_SIZE", &mut cfg.batch_size);
        override_from_env("EPS_START", &mut cfg.eps_start);
        override_from_env("EPS_END", &mut cfg.eps_end);
        override_from_env("EPS_DECAY", &mut cfg.eps_decay);
        override_from_env("LR", &mut cfg.lr);
        override_from_env("GAMMA", &mut cfg.gamma);
        override_from_env("AGENTS_TYPE", &mut cfg.agents_type);
        override_from_env("SEED", &mut cfg.seed);
        override_from_env("THREADS", &mut cfg.threads);
        cfg
    }

    /// Reject values the run loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_freq == 0 {
            return Err(ConfigError::InvalidValue {
                field: "action_freq",
                reason: "must be at least 1".into(),
            });
        }
        if self.update_freq == 0 {
            return Err(ConfigError::InvalidValue {
                field: "update_freq",
                reason: "must be at least 1".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.eps_start) || !(0.0..=1.0).contains(&self.eps_end) {
            return Err(ConfigError::InvalidValue {
                field: "eps_start/eps_end",
                reason: "must lie in [0, 1]".into(),
            });
        }
        if self.eps_end > self.eps_start {
            return Err(ConfigError::InvalidValue {
                field: "eps_end",
                reason: format!("floor {} exceeds start {}", self.eps_end, self.eps_start),
            });
        }
        if self.eps_decay < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "eps_decay",
                reason: "must be non-negative".into(),
            });
        }
        if !(self.lr > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "lr",
                reason: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(ConfigError::InvalidValue {
                field: "gamma",
                reason: "must lie in [0, 1]".into(),
            });
        }
        Ok(())
    }

    /// Learner settings for the agent at `index`.
    pub fn dqn_config(&self, index: usize) -> DqnConfig {
        DqnConfig {
            lr: self.lr,
            gamma: self.gamma,
            seed: self.seed.wrapping_mul(1_000).wrapping_add(index as u64),
            ..DqnConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_parse_roundtrip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), kind);
        }
        assert_eq!(" Learning ".parse::<AgentKind>().unwrap(), AgentKind::Learning);
    }

    #[test]
    fn test_unknown_agent_type_lists_choices() {
        let err = "cluster".parse::<AgentKind>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownAgentType {
                given: "cluster".into(),
                valid: vec!["fixed", "analytical", "learning", "presslight"],
            }
        );
        let msg = err.to_string();
        assert!(msg.contains("cluster"));
        assert!(msg.contains("fixed, analytical, learning, presslight"));
    }

    #[test]
    fn test_distance_only_for_learning_families() {
        assert!(!AgentKind::Fixed.needs_vehicle_distance());
        assert!(!AgentKind::Analytical.needs_vehicle_distance());
        assert!(AgentKind::Learning.needs_vehicle_distance());
        assert!(AgentKind::Presslight.needs_vehicle_distance());
    }

    #[test]
    fn test_default_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_floor_above_start() {
        let cfg = Config {
            eps_start: 0.1,
            eps_end: 0.5,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "eps_end", .. })
        ));
    }

    #[test]
    fn test_dqn_seeds_differ_per_agent() {
        let cfg = Config::default();
        assert_ne!(cfg.dqn_config(0).seed, cfg.dqn_config(1).seed);
        assert_eq!(cfg.dqn_config(0).lr, cfg.lr);
    }
}
