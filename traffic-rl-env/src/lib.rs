//! Traffic intersection environment adapter.
//!
//! Implements the core `Environment` trait over a traffic simulator:
//! phase actions with a safe amber dwell, per-second detector
//! accounting, and configurable reward shaping. The simulator itself is
//! an external collaborator behind the [`SimulatorClient`] trait; a
//! deterministic [`ScriptedSimulator`] backs tests and dry runs.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod simulator;
pub mod traffic;

pub use simulator::{ScriptedSimulator, SimulatorClient};
pub use traffic::{
    DetectorDef, DetectorKind, PhaseDef, RewardConfig, TrafficEnv, TrafficEnvConfig,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{ScriptedSimulator, SimulatorClient, TrafficEnv, TrafficEnvConfig};
}
