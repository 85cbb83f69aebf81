// src/error.rs
//
// Typed errors for configuration and simulator calls. File loading and the
// binary use anyhow on top of these.

use thiserror::Error;

/// Errors raised while resolving run configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The agent-type selector did not match any registered agent family.
    #[error("unknown agent type {given:?}; valid choices are: {}", .valid.join(", "))]
    UnknownAgentType { given: String, valid: Vec<&'static str> },

    /// A numeric parameter is outside its usable range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors returned by simulator engine calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("unknown intersection {0:?}")]
    UnknownIntersection(String),

    #[error("phase {phase} out of range for intersection {intersection:?} ({num_phases} phases)")]
    PhaseOutOfRange {
        intersection: String,
        phase: usize,
        num_phases: usize,
    },

    #[error("invalid roadnet: {0}")]
    InvalidRoadnet(String),
}
