//! Error types for the FTRAC simulation core.

use thiserror::Error;

/// Errors that abort setup or a running simulation.
#[derive(Debug, Error)]
pub enum FtracError {
    /// A neighbor references an unknown agent, or the agent set is malformed
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// The sample interval leaves no sampled points in the horizon
    #[error("Degenerate sampling: interval of {sample_interval} steps yields no samples in {n_points} points")]
    DegenerateSampling {
        sample_interval: usize,
        n_points: usize,
    },

    /// NaN or Inf appeared in the state vector
    #[error("Non-finite state after step {step} (t = {time:.6}s)")]
    NonFiniteState {
        step: usize,
        time: f64,
    },

    /// A run parameter is out of its valid range
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A sample was written past the pre-sized recorder capacity
    #[error("Recorder overflow: index {index} exceeds capacity {capacity}")]
    RecorderOverflow {
        index: usize,
        capacity: usize,
    },

    /// Topology or configuration JSON could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FtracError {
    /// Creates a topology error.
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::InvalidTopology(msg.into())
    }

    /// Creates a parameter error.
    pub fn parameters(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, FtracError>;
