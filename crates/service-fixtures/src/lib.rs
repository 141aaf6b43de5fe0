//! # service-fixtures
//!
//! Disposable Postgres and RabbitMQ containers for automated test runs.
//!
//! Test code asks a fixture for a ready-to-use backing service; the fixture
//! allocates host ports, provisions a uniquely named container, waits until
//! the service answers protocol-level checks, creates the logical resources
//! tests need, and tears everything down deterministically afterwards.
//!
//! ## Example
//!
//! ```rust,no_run
//! use service_fixtures::{PortAllocator, PostgresFixture, connect};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> service_fixtures::Result<()> {
//! let docker = connect()?;
//! let allocator = PortAllocator::new();
//! let cancel = CancellationToken::new();
//!
//! let fixture = PostgresFixture::initialize(&docker, &allocator, &cancel).await?;
//! let pool = fixture.pool("test_db").await?;
//! sqlx::query("select 1").execute(&pool).await?;
//! fixture.dispose().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod fixture;
mod ports;
mod postgres;
mod probe;
mod rabbitmq;

pub use error::{FixtureError, Result};
pub use fixture::{DEFAULT_TEST_DB, PostgresFixture, RabbitMqFixture};
pub use ports::PortAllocator;
pub use postgres::{PostgresContainer, PostgresOptions, PostgresProbe};
pub use probe::{Prober, ReadinessPolicy, wait_until_ready};
pub use rabbitmq::{RabbitMqContainer, RabbitMqOptions, RabbitMqProbe};

pub use docker_control::{ContainerHandle, ContainerSpec, ContainerState, PortMapping, ReusePolicy, connect};
