//! Error types for the traffic RL workspace

use thiserror::Error;

/// Error taxonomy for training and environment operations.
///
/// `Config` errors are fatal and surface before training starts.
/// `Collaborator` errors come from external processes (simulator,
/// checkpoint files, images); the training loop aborts on them rather
/// than guessing state. `Precondition` and `DimensionMismatch` indicate
/// programmer errors and fail loudly.
#[derive(Error, Debug)]
pub enum TrafficRlError {
    /// Invalid configuration (unknown stack name, mismatched checkpoint shape)
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure in an external collaborator (simulator, checkpoint, image)
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// A caller violated an internal precondition
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Tensor or batch shapes disagree
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Environment-level failure
    #[error("environment error: {0}")]
    Environment(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for traffic RL operations
pub type Result<T> = std::result::Result<T, TrafficRlError>;
