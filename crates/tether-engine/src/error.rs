//! Engine error types

use std::time::Duration;

use thiserror::Error;
use tether_sdk::{BridgeError, HostError};

/// Result type for runtime-level operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of a runtime-level operation
#[derive(Debug, Error)]
pub enum EngineError {
    /// A host operation failed or threw
    #[error(transparent)]
    Host(#[from] HostError),

    /// A bridge operation failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Outstanding work made no progress within the idle timeout
    #[error("no progress after {0:?} with {1} calls outstanding")]
    IdleTimeout(Duration, usize),

    /// A value cannot be represented as JSON
    #[error("cannot convert to JSON: {0}")]
    Json(String),
}

impl EngineError {
    /// Thrown host value, if the failure was an uncaught exception
    pub fn thrown(&self) -> Option<tether_sdk::HostValue> {
        match self {
            EngineError::Host(HostError::Exception(value)) => Some(*value),
            EngineError::Bridge(BridgeError::Thrown { value, .. }) => *value,
            _ => None,
        }
    }
}
