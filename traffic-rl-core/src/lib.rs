//! Core reinforcement learning traits and types for the traffic signal
//! controller.
//!
//! This crate provides the foundational abstractions shared by the DQN
//! agent and the traffic environment adapter: actions and action spaces,
//! observations, rewards, transitions, the environment trait, and the
//! error taxonomy.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod environment;
pub mod error;
pub mod observation;
pub mod reward;
pub mod transition;

// Re-export core traits and types
pub use action::{DiscreteAction, DiscreteSpace};
pub use environment::{Environment, Episode, Step, StepInfo};
pub use error::{Result, TrafficRlError};
pub use observation::{BoxObservationSpace, ImageObservation, Observation, VectorObservation};
pub use reward::Reward;
pub use transition::Transition;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DiscreteAction, DiscreteSpace, Environment, Observation, Result, Reward, Step, Transition,
    };
}
