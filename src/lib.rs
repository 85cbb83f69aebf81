//! Traffic-signal control with reinforcement-learning agents.
//!
//! An [`Environment`] drives a simulator [`Engine`] tick by tick: it keeps
//! speed, stop and lane flow/density statistics, steps one agent per
//! intersection and decays the exploration rate. The binary (`src/main.rs`)
//! is a thin training harness around these components.

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod lane;
pub mod logging;
pub mod metrics;
pub mod rl;
pub mod runner;
pub mod schedule;
pub mod sim;
pub mod stops;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use agent::{build_agent, build_agents, ActionMode, Agent, AgentBase, StepContext};

pub use config::{AgentKind, Config};

pub use environment::Environment;

pub use error::{ConfigError, SimError};

pub use lane::{mfd_data, Lane, MfdPoint, FLOW_WINDOW};

pub use logging::{build_sink, init_tracing, EpisodeSink, FileSink, NoopSink};

pub use metrics::SeriesStats;

pub use rl::{Dqn, DqnConfig, Mlp, ReplayMemory, Transition};

pub use runner::{run_episode, save_checkpoints, train, EpisodeSummary};

pub use schedule::EpsilonSchedule;

pub use sim::{Engine, GridEngine, GridSpec, Roadnet, SimConfig};

pub use stops::StopTracker;

pub use types::{IntersectionInfo, MovementInfo, PhaseInfo, VehicleInfo, STOP_SPEED_THRESHOLD};
