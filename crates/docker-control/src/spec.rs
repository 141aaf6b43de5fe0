//! Declarative container specifications.

use serde::{Deserialize, Serialize};

/// What to do when a container with the spec's name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReusePolicy {
    /// Attach to the existing container instead of creating a new one
    ReuseIfExists,
    /// Force-remove any existing container of the same name, then create fresh
    AlwaysRecreate,
}

/// A single host-to-container port exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port bound on the host
    pub host: u16,
    /// Port the service listens on inside the container
    pub container: u16,
}

/// Declarative spec for a single named container.
///
/// The name must be unique per host; concurrent test partitions are expected
/// to suffix their container names. Ports and environment are ordered as
/// declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique per host
    pub name: String,
    /// Image repository, e.g. `postgres`
    pub image: String,
    /// Image version tag, e.g. `11.8-alpine`
    pub tag: String,
    /// Host-to-container port mappings, in declaration order
    pub ports: Vec<PortMapping>,
    /// Environment variables, in declaration order
    pub env: Vec<(String, String)>,
    /// What to do with a pre-existing container of the same name
    pub reuse: ReusePolicy,
}

impl ContainerSpec {
    /// Create a spec with no ports or environment and the
    /// [`ReusePolicy::AlwaysRecreate`] default.
    pub fn new(name: impl Into<String>, image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            tag: tag.into(),
            ports: Vec::new(),
            env: Vec::new(),
            reuse: ReusePolicy::AlwaysRecreate,
        }
    }

    /// Expose a container port on a host port
    pub fn with_port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping { host, container });
        self
    }

    /// Set an environment variable inside the container
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the reuse policy
    pub fn with_reuse(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    /// Full image reference, `image:tag`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}
