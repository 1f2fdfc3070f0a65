//! Environment trait and step/episode types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BoxObservationSpace, DiscreteAction, DiscreteSpace, Observation, Reward};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step<O> {
    /// Observation after the step
    pub observation: O,
    /// Reward signal
    pub reward: Reward,
    /// Whether the episode reached a natural terminal state
    pub terminated: bool,
    /// Whether the episode was cut off (e.g., step budget expired)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

impl<O> Step<O> {
    /// Whether the episode is over, for either reason
    #[must_use]
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Additional information attached to a step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Record of one completed episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode ID
    pub id: String,
    /// Total reward accumulated over the episode
    pub total_reward: f32,
    /// Number of steps taken
    pub steps: usize,
    /// Whether the episode was truncated rather than terminated
    pub truncated: bool,
    /// Start time
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// End time
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Core environment trait.
///
/// The training loop drives this strictly sequentially: each `step`
/// completes before the next optimizer update runs, so implementations
/// may block on their collaborator (the traffic simulator) inside the
/// async call.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Observation type emitted by this environment
    type Observation: Observation;

    /// Get the observation space
    fn observation_space(&self) -> BoxObservationSpace;

    /// Get the action space
    fn action_space(&self) -> DiscreteSpace;

    /// Reset the environment and return the initial observation
    async fn reset(&mut self) -> crate::Result<Self::Observation>;

    /// Apply an action and advance the environment
    async fn step(&mut self, action: DiscreteAction) -> crate::Result<Step<Self::Observation>>;

    /// Close the environment and release collaborator resources
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}
