//! Error types for service fixtures.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for service-fixture operations
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Fixture error types.
///
/// Provisioning and readiness failures are fatal to the fixture and are
/// expected to fail the test run that depends on it. Individual probe
/// attempt failures are swallowed until the readiness budget is exhausted.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// Container lifecycle failure
    #[error("container error: {0}")]
    Docker(#[source] docker_control::Error),

    /// The service never became reachable within the readiness budget.
    /// Carries the last underlying probe failure when at least one attempt
    /// ran.
    #[error("service did not become ready within {elapsed:?}")]
    ReadinessTimeout {
        /// Time spent probing (excluding the initial delay)
        elapsed: Duration,
        /// The last probe attempt failure, if any attempt ran
        #[source]
        last_failure: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Initialization or probing aborted due to external cancellation;
    /// distinct from a readiness timeout
    #[error("operation cancelled")]
    Cancelled,

    /// Database protocol failure outside the probe loop (logical resource
    /// management, fixture connections)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O failure (port allocation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<docker_control::Error> for FixtureError {
    fn from(err: docker_control::Error) -> Self {
        // Cancellation stays distinct from other container failures all the
        // way up.
        match err {
            docker_control::Error::Cancelled => Self::Cancelled,
            other => Self::Docker(other),
        }
    }
}
