//! Container runtime boundary
//!
//! The reconciler and janitor talk to the host's container daemon only
//! through [`ContainerRuntime`]. [`docker::DockerRuntime`] is the production
//! implementation.

pub mod docker;
pub mod registry;

use async_trait::async_trait;

use crate::errors::AgentError;

/// Lifecycle state reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Other(other.to_string()),
        }
    }
}

/// A container as observed on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    /// Names as the runtime reports them, with a leading `/`
    pub names: Vec<String>,
    pub networks: Vec<String>,
    pub state: ContainerState,
}

impl ContainerSummary {
    /// Exact name match, ignoring the runtime's leading `/`
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }
}

/// Filter for container listings. Every listing includes stopped containers.
///
/// `ancestor` and `name` follow the runtime's own matching rules, which are
/// looser than equality; callers confirm matches themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub ancestor: Option<String>,
    pub name: Option<String>,
    pub network: Option<String>,
}

impl ContainerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_ancestor(image: &str) -> Self {
        Self {
            ancestor: Some(image.to_string()),
            ..Default::default()
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn by_network(network: &str) -> Self {
        Self {
            network: Some(network.to_string()),
            ..Default::default()
        }
    }
}

/// Host port binding for one published container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Container port with protocol, e.g. `8080/tcp`
    pub container_port: String,
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainerSpec {
    pub name: String,
    pub image: String,
    /// `NAME=value` entries
    pub env: Vec<String>,
    pub port: Option<PortMapping>,
    /// The single network the container joins
    pub network: String,
    /// Ask the runtime to restart the container whenever it stops
    pub restart_always: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// Primitive operations against the host's container daemon
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image and return only once the pull has fully completed
    async fn pull_image(&self, image: &str) -> Result<(), AgentError>;

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, AgentError>;

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), AgentError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), AgentError>;

    /// Create a container and return its ID
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, AgentError>;

    async fn start_container(&self, id: &str) -> Result<(), AgentError>;

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, AgentError>;

    async fn create_network(&self, name: &str) -> Result<(), AgentError>;

    /// Images with no tag and no container referencing them
    async fn list_dangling_images(&self) -> Result<Vec<ImageSummary>, AgentError>;

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), AgentError>;
}
