// src/rl/mod.rs
//
// Q-function approximation for the learning agents.
//
// Key components:
// - Mlp: 3-layer feed-forward network with JSON checkpoints
// - ReplayMemory: bounded experience buffer
// - Dqn: policy/target networks, epsilon-greedy selection, TD updates

pub mod dqn;
pub mod mlp;
pub mod replay;

pub use dqn::{Dqn, DqnConfig};
pub use mlp::{argmax, Adam, Gradients, Linear, Mlp, CHECKPOINT_VERSION};
pub use replay::{ReplayMemory, Transition};
