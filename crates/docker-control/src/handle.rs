//! Runtime binding of a [`ContainerSpec`] to an actual container.

use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig, PortBinding};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::spec::{ContainerSpec, ReusePolicy};
use crate::{Error, Result};

/// Ceiling for the engine-side "mapped port is listening" wait after start.
/// Coarse liveness only; protocol readiness is probed by the caller.
const START_PORT_CEILING: Duration = Duration::from_secs(120);

/// Poll interval for the port wait
const START_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-attempt connect timeout for the port wait
const START_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Observed lifecycle state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created (or adopted) but not known to be running
    Created,
    /// Started and its first mapped port answered
    Running,
    /// Stopped
    Stopped,
    /// Removed from the engine
    Removed,
}

/// Exclusive handle to a single named container.
///
/// Owned by the service container that created it; never shared. All
/// teardown operations are idempotent.
pub struct ContainerHandle {
    docker: Docker,
    spec: ContainerSpec,
    id: Option<String>,
    state: ContainerState,
    ip: Option<String>,
}

impl ContainerHandle {
    /// Create a container from `spec`, or attach to an existing one of the
    /// same name under [`ReusePolicy::ReuseIfExists`].
    ///
    /// Under [`ReusePolicy::AlwaysRecreate`] any pre-existing container of
    /// the same name is force-removed first ("not found" counts as success).
    /// Engine rejections surface as [`Error::Provisioning`].
    pub async fn create_or_reuse(docker: Docker, spec: ContainerSpec) -> Result<Self> {
        if let Some(existing) = find_by_name(&docker, &spec.name).await? {
            match spec.reuse {
                ReusePolicy::ReuseIfExists => {
                    let running = existing.state.as_deref() == Some("running");
                    info!(
                        container = %spec.name,
                        running,
                        "adopting existing container"
                    );
                    return Ok(Self {
                        docker,
                        spec,
                        id: existing.id,
                        state: ContainerState::Created,
                        ip: None,
                    });
                }
                ReusePolicy::AlwaysRecreate => {
                    info!(container = %spec.name, "removing existing container before recreate");
                    remove_by_name(&docker, &spec.name).await?;
                }
            }
        }

        ensure_image(&docker, &spec.image_ref()).await?;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for mapping in &spec.ports {
            let container_port = format!("{}/tcp", mapping.container);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(mapping.host.to_string()),
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image_ref()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| match err {
                DockerError::DockerResponseServerError {
                    status_code,
                    message,
                } => Error::Provisioning {
                    message: format!("engine rejected create ({status_code}): {message}"),
                },
                other => Error::Docker(other),
            })?;

        debug!(container = %spec.name, id = %response.id, "container created");

        Ok(Self {
            docker,
            spec,
            id: Some(response.id),
            state: ContainerState::Created,
            ip: None,
        })
    }

    /// Start the container and block until its first mapped port accepts TCP
    /// connections inside the container network, bounded by a fixed 2-minute
    /// ceiling.
    ///
    /// Starting an already-running container is a no-op on the engine side.
    /// Cancellation is observed at every poll boundary.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state == ContainerState::Running {
            return Ok(());
        }

        let id = self.require_id()?.to_string();

        match self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            // 304: already started
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(DockerError::DockerResponseServerError {
                status_code,
                message,
            }) => {
                return Err(Error::Provisioning {
                    message: format!("engine rejected start ({status_code}): {message}"),
                });
            }
            Err(other) => return Err(Error::Docker(other)),
        }

        let inspect = self
            .docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await?;
        let ip = inspect
            .network_settings
            .and_then(|settings| settings.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                Error::provisioning(format!(
                    "container '{}' has no network address",
                    self.spec.name
                ))
            })?;

        if let Some(mapping) = self.spec.ports.first() {
            self.wait_for_port(&ip, mapping.container, cancel).await?;
        }

        info!(container = %self.spec.name, ip = %ip, "container running");
        self.ip = Some(ip);
        self.state = ContainerState::Running;
        Ok(())
    }

    /// Stop the container. Stopping an already-stopped or removed container
    /// is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if matches!(self.state, ContainerState::Stopped | ContainerState::Removed) {
            return Ok(());
        }
        let Some(id) = self.id.clone() else {
            return Ok(());
        };

        match self
            .docker
            .stop_container(&id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => {}
            // 304: already stopped, 404: already gone
            Err(DockerError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(other) => return Err(Error::Docker(other)),
        }

        debug!(container = %self.spec.name, "container stopped");
        self.state = ContainerState::Stopped;
        Ok(())
    }

    /// Force-remove the container. Removing an already-removed container is
    /// a no-op.
    pub async fn remove(&mut self) -> Result<()> {
        if self.state == ContainerState::Removed {
            return Ok(());
        }
        let Some(id) = self.id.clone() else {
            return Ok(());
        };

        match self
            .docker
            .remove_container(
                &id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(other) => return Err(Error::Docker(other)),
        }

        debug!(container = %self.spec.name, "container removed");
        self.state = ContainerState::Removed;
        self.ip = None;
        Ok(())
    }

    /// The container's internal network address.
    ///
    /// Only valid after [`start`](Self::start) has returned successfully;
    /// fails with [`Error::NotStarted`] otherwise.
    pub fn ip_address(&self) -> Result<&str> {
        self.ip.as_deref().ok_or_else(|| Error::NotStarted {
            name: self.spec.name.clone(),
        })
    }

    /// Observed lifecycle state
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// The spec this handle was created from
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    fn require_id(&self) -> Result<&str> {
        self.id.as_deref().ok_or_else(|| Error::NotStarted {
            name: self.spec.name.clone(),
        })
    }

    async fn wait_for_port(
        &self,
        ip: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match timeout(START_CONNECT_TIMEOUT, TcpStream::connect((ip, port))).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(err)) => {
                    debug!(container = %self.spec.name, port, error = %err, "port not open yet")
                }
                Err(_) => debug!(container = %self.spec.name, port, "port connect timed out"),
            }

            if started.elapsed() >= START_PORT_CEILING {
                warn!(container = %self.spec.name, port, "port never opened after start");
                return Err(Error::StartTimeout {
                    name: self.spec.name.clone(),
                    port,
                    ceiling: START_PORT_CEILING,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(START_POLL_INTERVAL) => {}
            }
        }
    }
}

/// Find a container whose name matches `name` exactly.
///
/// The engine's name filter is a substring match, so the result is
/// re-checked against the canonical `/name` form.
async fn find_by_name(docker: &Docker, name: &str) -> Result<Option<ContainerSummary>> {
    let mut filters = HashMap::new();
    filters.insert("name".to_string(), vec![name.to_string()]);

    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await?;

    let canonical = format!("/{name}");
    Ok(containers.into_iter().find(|container| {
        container
            .names
            .as_ref()
            .is_some_and(|names| names.iter().any(|candidate| candidate == &canonical))
    }))
}

/// Force-remove a container by name, treating "not found" as success.
async fn remove_by_name(docker: &Docker, name: &str) -> Result<()> {
    match docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        Ok(()) => Ok(()),
        Err(DockerError::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(other) => Err(Error::Docker(other)),
    }
}

/// Pull the image if the engine does not already have it.
async fn ensure_image(docker: &Docker, image_ref: &str) -> Result<()> {
    match docker.inspect_image(image_ref).await {
        Ok(_) => return Ok(()),
        Err(DockerError::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(other) => return Err(Error::Docker(other)),
    }

    info!(image = %image_ref, "pulling image");
    let mut pull = docker.create_image(
        Some(CreateImageOptions {
            from_image: image_ref.to_string(),
            ..Default::default()
        }),
        None,
        None,
    );

    while let Some(progress) = pull.next().await {
        progress
            .map_err(|err| Error::provisioning(format!("failed to pull image '{image_ref}': {err}")))?;
    }

    Ok(())
}
