//! Container reconciler
//!
//! Turns a deployment intent into a running container on the host: pull,
//! evict whatever holds the same image or name, create, start. Also replays
//! every stored intent on the shared network after a secret rotation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::deploy::env::{process_env, resolve_env};
use crate::deploy::janitor::Janitor;
use crate::errors::AgentError;
use crate::models::deployment::DeploymentIntent;
use crate::runtime::{ContainerFilter, ContainerRuntime, CreateContainerSpec, PortMapping};
use crate::storage::records::RecordStore;

/// Reconciler settings
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Shared network every managed container joins
    pub network_name: String,

    /// Seconds the runtime waits before killing an evicted container
    pub stop_grace_secs: i64,

    /// Kick off host cleanup on every deploy attempt
    pub cleanup_on_deploy: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            network_name: "bluerobin".to_string(),
            stop_grace_secs: 0,
            cleanup_on_deploy: true,
        }
    }
}

/// One container replaced during a recreation sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recreated {
    pub old_id: String,
    pub new_id: String,
    pub name: String,
}

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    records: Arc<RecordStore>,
    janitor: Janitor,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        records: Arc<RecordStore>,
        options: ReconcilerOptions,
    ) -> Self {
        let janitor = Janitor::new(runtime.clone());
        Self {
            runtime,
            records,
            janitor,
            options,
        }
    }

    /// Deploy `intent` and return the new container's ID.
    ///
    /// Does not write a deployment record; the caller persists it on success.
    pub async fn deploy(&self, intent: &DeploymentIntent) -> Result<String, AgentError> {
        intent.validate()?;

        let image = intent.container.image.as_str();
        let name = intent.container.name.as_str();

        if self.options.cleanup_on_deploy {
            self.janitor.spawn_remove_exited();
        }

        info!("Pulling image: {}", image);
        self.runtime.pull_image(image).await.map_err(|e| {
            error!("Error pulling image {}: {}", image, e);
            e
        })?;

        let evicted = self.evict_conflicts(image, name).await;
        debug!("Evicted {} container(s) for {} / {}", evicted, image, name);

        if self.options.cleanup_on_deploy {
            self.janitor.spawn_remove_dangling();
        }

        let env = resolve_env(&intent.container, process_env);
        let env_names: Vec<&str> = env
            .iter()
            .filter_map(|entry| entry.split_once('=').map(|(k, _)| k))
            .collect();
        debug!(container = %name, "Environment variables: {:?}", env_names);

        self.ensure_network().await?;

        let spec = CreateContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            env,
            port: port_mapping(intent),
            network: self.options.network_name.clone(),
            restart_always: true,
        };

        info!("Creating container {} from {}", name, image);
        let id = self.runtime.create_container(&spec).await.map_err(|e| {
            error!("Error creating container {}: {}", name, e);
            e
        })?;

        // A failed start leaves the created container behind
        self.runtime.start_container(&id).await.map_err(|e| {
            error!("Error starting container {} ({}): {}", name, id, e);
            e
        })?;

        info!(container_id = %id, "Container {} started from {}", name, image);
        Ok(id)
    }

    /// Force-stop and remove every container built from `image` or named
    /// `name`, in any state. Failures are logged; returns how many containers
    /// were removed.
    pub async fn evict_conflicts(&self, image: &str, name: &str) -> usize {
        info!(
            "Checking for containers using image '{}' or with name '{}'",
            image, name
        );

        let passes = [ContainerFilter::by_ancestor(image), ContainerFilter::by_name(name)];
        let mut attempted = HashSet::new();
        let mut removed = 0;

        for filter in &passes {
            let containers = match self.runtime.list_containers(filter).await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!("Error listing containers with {:?}: {}", filter, e);
                    continue;
                }
            };

            let conflicts = containers
                .into_iter()
                .filter(|c| c.image == image || c.has_name(name));

            for container in conflicts {
                if !attempted.insert(container.id.clone()) {
                    continue;
                }

                info!("Stopping container {} ({:?})", container.id, container.names);
                if let Err(e) = self
                    .runtime
                    .stop_container(&container.id, self.options.stop_grace_secs)
                    .await
                {
                    warn!("Error stopping container {}: {}", container.id, e);
                }

                match self.runtime.remove_container(&container.id, true).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Error removing container {}: {}", container.id, e),
                }
            }
        }

        removed
    }

    /// Create the shared network unless one with that exact name exists
    pub async fn ensure_network(&self) -> Result<(), AgentError> {
        let name = &self.options.network_name;
        let networks = self.runtime.list_networks(name).await?;
        if networks.iter().any(|n| &n.name == name) {
            return Ok(());
        }

        info!("Creating network: {}", name);
        self.runtime.create_network(name).await
    }

    /// Redeploy every container on the shared network from its stored
    /// record, re-keying each record to the new container ID.
    ///
    /// All records are loaded before anything is touched; one missing record
    /// aborts the sweep with no container changed. Containers are replaced
    /// one at a time and the first failure stops the sweep.
    pub async fn recreate_all(&self) -> Result<Vec<Recreated>, AgentError> {
        let containers = self
            .runtime
            .list_containers(&ContainerFilter::by_network(&self.options.network_name))
            .await?;

        info!(
            "Recreating {} container(s) on network {}",
            containers.len(),
            self.options.network_name
        );

        let mut plan = Vec::with_capacity(containers.len());
        for container in &containers {
            let intent = self.records.get(&container.id).await.map_err(|e| {
                AgentError::RecreateError(format!(
                    "cannot load record for container {} {:?}: {}",
                    container.id, container.names, e
                ))
            })?;
            plan.push((container.id.clone(), intent));
        }

        let mut recreated = Vec::with_capacity(plan.len());
        for (old_id, intent) in plan {
            let name = intent.container.name.clone();

            let new_id = self.deploy(&intent).await.map_err(|e| {
                AgentError::RecreateError(format!("redeploy of {} ({}) failed: {}", name, old_id, e))
            })?;

            self.records.put(&new_id, &intent).await?;
            self.records.delete(&old_id).await?;

            info!("Recreated {}: {} -> {}", name, old_id, new_id);
            recreated.push(Recreated {
                old_id,
                new_id,
                name,
            });
        }

        Ok(recreated)
    }
}

fn port_mapping(intent: &DeploymentIntent) -> Option<PortMapping> {
    let container_port = intent.published_port()?;
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    Some(PortMapping {
        container_port: format!("{}/tcp", container_port),
        host_ip: non_empty(&intent.container.binding),
        host_port: non_empty(&intent.container.host_port),
    })
}
