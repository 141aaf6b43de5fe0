//! Disposable RabbitMQ container.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use bollard::Docker;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docker_control::{ContainerHandle, ContainerSpec, ReusePolicy};

use crate::error::Result;
use crate::probe::{Prober, ReadinessPolicy, wait_until_ready};

/// Port the broker listens on inside the container
const AMQP_PORT: u16 = 5672;

/// Port the management plugin listens on inside the container
const MANAGEMENT_PORT: u16 = 15672;

/// Per-attempt connect timeout for the broker probe
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Construction options for [`RabbitMqContainer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitMqOptions {
    /// Container name (default `tests-rabbit`)
    pub name: String,
    /// Host port mapped to the container's 5672 (default 5672)
    pub host_amqp_port: u16,
    /// Host port mapped to the container's 15672 (default 15672)
    pub host_management_port: u16,
    /// Default user (default `rabbit`)
    pub user: String,
    /// Default user's password (default `pass`)
    pub password: String,
    /// Reuse policy for a pre-existing same-named container
    /// (default [`ReusePolicy::AlwaysRecreate`])
    pub reuse: ReusePolicy,
    /// Image version tag (default `3.8.6-management-alpine`)
    pub version: String,
    /// Readiness probing policy (default 1s delay, 500ms interval, 30s budget)
    pub readiness: ReadinessPolicy,
}

impl Default for RabbitMqOptions {
    fn default() -> Self {
        Self {
            name: "tests-rabbit".to_string(),
            host_amqp_port: AMQP_PORT,
            host_management_port: MANAGEMENT_PORT,
            user: "rabbit".to_string(),
            password: "pass".to_string(),
            reuse: ReusePolicy::AlwaysRecreate,
            version: "3.8.6-management-alpine".to_string(),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl RabbitMqOptions {
    /// Set the container name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the host ports mapped to AMQP and the management plugin
    pub fn with_host_ports(mut self, amqp: u16, management: u16) -> Self {
        self.host_amqp_port = amqp;
        self.host_management_port = management;
        self
    }

    /// Set the default user credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the reuse policy
    pub fn with_reuse(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    /// Set the image version tag
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the readiness policy
    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// AMQP endpoint URL, host-side (loopback + mapped host port)
    pub fn amqp_url(&self) -> String {
        format!("amqp://127.0.0.1:{}", self.host_amqp_port)
    }

    /// Management endpoint URL, host-side
    pub fn management_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.host_management_port)
    }
}

/// A RabbitMQ broker running in a disposable container.
///
/// Readiness is a raw transport check: the broker port accepting TCP
/// connections. Consumers needing protocol-level guarantees layer them on
/// top of the derived AMQP URL.
pub struct RabbitMqContainer {
    handle: ContainerHandle,
    options: RabbitMqOptions,
}

impl RabbitMqContainer {
    /// Create or reuse the underlying container according to the options'
    /// reuse policy. The container is not started yet.
    pub async fn provision(docker: &Docker, options: RabbitMqOptions) -> Result<Self> {
        let spec = ContainerSpec::new(&options.name, "rabbitmq", &options.version)
            .with_port(options.host_amqp_port, AMQP_PORT)
            .with_port(options.host_management_port, MANAGEMENT_PORT)
            .with_env("RABBITMQ_DEFAULT_USER", &options.user)
            .with_env("RABBITMQ_DEFAULT_PASS", &options.password)
            .with_reuse(options.reuse);

        let handle = ContainerHandle::create_or_reuse(docker.clone(), spec).await?;
        Ok(Self { handle, options })
    }

    /// Start the container and block until the broker port accepts TCP
    /// connections.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.handle.start(cancel).await?;

        let probe = RabbitMqProbe::new("127.0.0.1", self.options.host_amqp_port);
        wait_until_ready(&probe, &self.options.readiness, cancel).await?;

        info!(
            container = %self.options.name,
            amqp_port = self.options.host_amqp_port,
            "rabbitmq ready"
        );
        Ok(())
    }

    /// Stop and remove the container. Idempotent.
    ///
    /// The two steps are independent: a failed stop is logged and the
    /// force-remove still runs, since removal reclaims the container
    /// either way.
    pub async fn stop(&mut self) -> Result<()> {
        if let Err(err) = self.handle.stop().await {
            warn!(container = %self.options.name, error = %err, "stop failed; still removing");
        }
        self.handle.remove().await?;
        Ok(())
    }

    /// AMQP endpoint URL
    pub fn amqp_url(&self) -> String {
        self.options.amqp_url()
    }

    /// Management endpoint URL
    pub fn management_url(&self) -> String {
        self.options.management_url()
    }

    /// The container's internal network address; valid only after `start`
    pub fn container_ip(&self) -> Result<&str> {
        Ok(self.handle.ip_address()?)
    }

    /// Mapped host AMQP port
    pub fn host_amqp_port(&self) -> u16 {
        self.options.host_amqp_port
    }

    /// Mapped host management port
    pub fn host_management_port(&self) -> u16 {
        self.options.host_management_port
    }

    /// Default user
    pub fn user(&self) -> &str {
        &self.options.user
    }

    /// Default user's password
    pub fn password(&self) -> &str {
        &self.options.password
    }
}

/// Raw transport reachability check: success is an established TCP
/// connection to the broker port.
pub struct RabbitMqProbe {
    host: String,
    port: u16,
}

impl RabbitMqProbe {
    /// Probe against the given host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Prober for RabbitMqProbe {
    async fn attempt(&self) -> anyhow::Result<()> {
        timeout(
            PROBE_CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .context("broker connect timed out")?
        .context("broker connect failed")?;
        Ok(())
    }
}
