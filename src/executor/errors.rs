use std::time::Duration;

use thiserror::Error;

/// Failures reported by the underlying connection while a command runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection is closed")]
    Closed,
}
