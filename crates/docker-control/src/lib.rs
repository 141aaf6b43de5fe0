//! # docker-control
//!
//! Container lifecycle control for disposable test services.
//!
//! This crate owns the interaction with the Docker engine: declaring a
//! container ([`ContainerSpec`]), creating or reusing it by name, starting it
//! and waiting for its mapped port to open, and tearing it down idempotently
//! ([`ContainerHandle`]). Protocol-level readiness probing lives one layer up,
//! in `service-fixtures`; this crate only guarantees "the container process is
//! up and its port is listening".
//!
//! ## Example
//!
//! ```rust,no_run
//! use docker_control::{connect, ContainerHandle, ContainerSpec, ReusePolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> docker_control::Result<()> {
//! let docker = connect()?;
//!
//! let spec = ContainerSpec::new("tests-pg", "postgres", "11.8-alpine")
//!     .with_port(54321, 5432)
//!     .with_env("POSTGRES_PASSWORD", "pass")
//!     .with_reuse(ReusePolicy::AlwaysRecreate);
//!
//! let mut handle = ContainerHandle::create_or_reuse(docker, spec).await?;
//! handle.start(&CancellationToken::new()).await?;
//! // ... use the service ...
//! handle.stop().await?;
//! handle.remove().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod handle;
mod spec;

pub use error::{Error, Result};
pub use handle::{ContainerHandle, ContainerState};
pub use spec::{ContainerSpec, PortMapping, ReusePolicy};

use bollard::Docker;

/// Connect to the local Docker engine using the platform defaults
/// (unix socket on Linux, named pipe on Windows).
pub fn connect() -> Result<Docker> {
    Ok(Docker::connect_with_local_defaults()?)
}
