//! Harness error types.

use ftrac_core::FtracError;
use thiserror::Error;

/// Errors raised while preparing, running or exporting a scenario.
#[derive(Debug, Error)]
pub enum SimError {
    /// The core rejected the setup or aborted the run
    #[error("Simulation error: {0}")]
    Core(#[from] FtracError),

    /// Export file could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Export could not be encoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;
