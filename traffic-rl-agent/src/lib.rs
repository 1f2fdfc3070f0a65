//! Deep Q-Network agent for the traffic signal controller.
//!
//! This crate implements the full DQN training subsystem: a bounded
//! replay memory, Q-network layer stacks selectable by name, an AdamW
//! optimizer with Huber loss and gradient clipping, epsilon-greedy
//! action selection, Polyak target-network synchronization, and the
//! episode driver that ties them together.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod dqn;
pub mod optim;
pub mod qnet;
pub mod session;

// Re-export agent types
pub use buffer::ReplayMemory;
pub use dqn::{DQNAgent, DQNConfig};
pub use optim::AdamW;
pub use qnet::{argmax, stack, stack_names, NetworkCheckpoint, QNetwork, StackSpec};
pub use session::TrainingSession;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DQNAgent, DQNConfig, QNetwork, ReplayMemory, StackSpec, TrainingSession};
    pub use traffic_rl_core::prelude::*;
}
