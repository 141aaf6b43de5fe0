//! Error types for container lifecycle operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for docker-control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Container lifecycle error types
#[derive(Error, Debug)]
pub enum Error {
    /// The engine rejected a create/pull/start request (bad image, port
    /// already bound at the engine level, invalid configuration). Not
    /// retryable; the caller is expected to abort.
    #[error("provisioning failed: {message}")]
    Provisioning {
        /// What the engine rejected and why
        message: String,
    },

    /// Transport-level failure talking to the Docker engine
    #[error("Docker engine error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The container started but its mapped port never opened within the
    /// fixed start ceiling
    #[error("container '{name}' did not open port {port} within {ceiling:?}")]
    StartTimeout {
        /// Container name
        name: String,
        /// Container-side port that was polled
        port: u16,
        /// The fixed start ceiling that elapsed
        ceiling: Duration,
    },

    /// An accessor that requires a running container was called before
    /// `start()` completed
    #[error("container '{name}' has not been started")]
    NotStarted {
        /// Container name
        name: String,
    },

    /// The operation observed an external cancellation signal
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a provisioning error
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }
}
