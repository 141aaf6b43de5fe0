//! Per-test-run environments owning service containers and logical
//! resources.
//!
//! A fixture guarantees setup-before-use and teardown-after-use ordering:
//! `initialize` returns only once the container is running, the service
//! passed its readiness probe, and the default logical database exists.
//! `dispose` runs the teardown sequence (close tracked pools, drop logical
//! databases, stop and remove the container) with every step best-effort
//! and independently logged.

use std::collections::HashMap;

use bollard::Docker;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ports::PortAllocator;
use crate::postgres::{PostgresContainer, PostgresOptions};
use crate::rabbitmq::{RabbitMqContainer, RabbitMqOptions};

/// Default logical database created by [`PostgresFixture::initialize`]
pub const DEFAULT_TEST_DB: &str = "test_db";

/// Max connections for fixture-tracked pools; test workloads are small
const POOL_MAX_CONNECTIONS: u32 = 5;

/// A per-test-run postgres environment.
///
/// Owns one [`PostgresContainer`] plus the logical databases created through
/// it. Pools handed out by [`pool`](Self::pool) are tracked and closed
/// before any destructive drop, so lingering test connections never block
/// teardown.
pub struct PostgresFixture {
    container: PostgresContainer,
    pools: Mutex<HashMap<String, PgPool>>,
    databases: Mutex<Vec<String>>,
}

impl PostgresFixture {
    /// Provision and start a postgres container on an allocator-assigned
    /// host port, then create the default `test_db` logical database.
    pub async fn initialize(
        docker: &Docker,
        allocator: &PortAllocator,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let options = PostgresOptions::default().with_host_port(allocator.allocate()?);
        Self::initialize_with_options(docker, options, cancel).await
    }

    /// Like [`initialize`](Self::initialize) with explicit options.
    ///
    /// If initialization fails after the container was provisioned, the
    /// partially built environment is torn down best-effort before the
    /// error is surfaced.
    pub async fn initialize_with_options(
        docker: &Docker,
        options: PostgresOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut container = PostgresContainer::provision(docker, options).await?;
        if let Err(err) = container.start(cancel).await {
            if let Err(stop_err) = container.stop().await {
                warn!(error = %stop_err, "cleanup after failed start also failed");
            }
            return Err(err);
        }

        let fixture = Self {
            container,
            pools: Mutex::new(HashMap::new()),
            databases: Mutex::new(Vec::new()),
        };

        if let Err(err) = fixture.create_database(DEFAULT_TEST_DB).await {
            fixture.dispose().await;
            return Err(err);
        }

        Ok(fixture)
    }

    /// Create a logical database inside the running container and track it
    /// for teardown.
    pub async fn create_database(&self, name: &str) -> Result<()> {
        let mut conn = PgConnection::connect(&self.container.main_connection_string()).await?;
        conn.execute(format!("create database {name}").as_str())
            .await?;
        conn.close().await.ok();

        self.databases.lock().await.push(name.to_string());
        info!(database = %name, "created test database");
        Ok(())
    }

    /// Drop a logical database, closing its tracked pool and terminating
    /// any lingering sessions first.
    pub async fn drop_database(&self, name: &str) -> Result<()> {
        if let Some(pool) = self.pools.lock().await.remove(name) {
            pool.close().await;
        }
        terminate_and_drop(&self.container, name).await?;
        self.databases.lock().await.retain(|db| db != name);
        info!(database = %name, "dropped test database");
        Ok(())
    }

    /// A fixture-tracked connection pool for `database`, created lazily.
    /// Tracked pools are closed before the database is dropped.
    pub async fn pool(&self, database: &str) -> Result<PgPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(&self.container.connection_string(database))
            .await?;
        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }

    /// An untracked single connection to `database`; the caller owns its
    /// lifetime.
    pub async fn connect(&self, database: &str) -> Result<PgConnection> {
        Ok(PgConnection::connect(&self.container.connection_string(database)).await?)
    }

    /// Connection URL for `database`
    pub fn connection_string(&self, database: &str) -> String {
        self.container.connection_string(database)
    }

    /// The underlying service container
    pub fn container(&self) -> &PostgresContainer {
        &self.container
    }

    /// Tear the environment down: close tracked pools, drop logical
    /// databases (newest first), stop and remove the container.
    ///
    /// Every step is best-effort; failures are logged and the sequence
    /// continues so that as many resources as possible are actually freed.
    pub async fn dispose(self) {
        let Self {
            mut container,
            pools,
            databases,
        } = self;

        for (database, pool) in pools.into_inner() {
            pool.close().await;
            debug!(database = %database, "closed tracked pool");
        }

        let mut databases = databases.into_inner();
        databases.reverse();
        for database in &databases {
            if let Err(err) = terminate_and_drop(&container, database).await {
                warn!(database = %database, error = %err, "failed to drop test database");
            }
        }

        if let Err(err) = container.stop().await {
            warn!(error = %err, "failed to stop postgres container");
        }
        info!("postgres fixture disposed");
    }
}

/// Forcibly detach everything from `database`, then drop it.
///
/// New connections are disallowed before existing sessions are terminated,
/// so nothing can slip in between terminate and drop.
async fn terminate_and_drop(container: &PostgresContainer, database: &str) -> Result<()> {
    let mut conn = PgConnection::connect(&container.main_connection_string()).await?;

    sqlx::query("update pg_database set datallowconn = 'false' where datname = $1")
        .bind(database)
        .execute(&mut conn)
        .await?;
    conn.execute(format!("alter database {database} connection limit 1").as_str())
        .await?;
    sqlx::query("select pg_terminate_backend(pid) from pg_stat_activity where datname = $1")
        .bind(database)
        .execute(&mut conn)
        .await?;
    conn.execute(format!("drop database {database}").as_str())
        .await?;

    conn.close().await.ok();
    Ok(())
}

/// A per-test-run RabbitMQ environment.
pub struct RabbitMqFixture {
    container: RabbitMqContainer,
}

impl RabbitMqFixture {
    /// Provision and start a broker container on allocator-assigned host
    /// ports.
    pub async fn initialize(
        docker: &Docker,
        allocator: &PortAllocator,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let options = RabbitMqOptions::default()
            .with_host_ports(allocator.allocate()?, allocator.allocate()?);
        Self::initialize_with_options(docker, options, cancel).await
    }

    /// Like [`initialize`](Self::initialize) with explicit options.
    pub async fn initialize_with_options(
        docker: &Docker,
        options: RabbitMqOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut container = RabbitMqContainer::provision(docker, options).await?;
        if let Err(err) = container.start(cancel).await {
            if let Err(stop_err) = container.stop().await {
                warn!(error = %stop_err, "cleanup after failed start also failed");
            }
            return Err(err);
        }
        Ok(Self { container })
    }

    /// AMQP endpoint URL
    pub fn amqp_url(&self) -> String {
        self.container.amqp_url()
    }

    /// Management endpoint URL
    pub fn management_url(&self) -> String {
        self.container.management_url()
    }

    /// Default user
    pub fn user(&self) -> &str {
        self.container.user()
    }

    /// Default user's password
    pub fn password(&self) -> &str {
        self.container.password()
    }

    /// The underlying service container
    pub fn container(&self) -> &RabbitMqContainer {
        &self.container
    }

    /// Stop and remove the broker container, best-effort.
    pub async fn dispose(self) {
        let mut container = self.container;
        if let Err(err) = container.stop().await {
            warn!(error = %err, "failed to stop rabbitmq container");
        }
        info!("rabbitmq fixture disposed");
    }
}
