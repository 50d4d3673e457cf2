//! Host janitor
//!
//! Best-effort cleanup of exited containers and dangling images. Runs as
//! detached tasks; failures are logged and never reach a deploy result.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::runtime::{ContainerFilter, ContainerRuntime, ContainerState};

/// Cleanup jobs against the whole host runtime
#[derive(Clone)]
pub struct Janitor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Janitor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Remove every exited container. Returns how many were removed.
    pub async fn remove_exited_containers(&self) -> Result<usize, AgentError> {
        let containers = self.runtime.list_containers(&ContainerFilter::all()).await?;

        let mut removed = 0;
        for container in containers
            .iter()
            .filter(|c| c.state == ContainerState::Exited)
        {
            info!("Removing exited container {}", container.id);
            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove container {}: {}", container.id, e),
            }
        }
        Ok(removed)
    }

    /// Remove every dangling image. Returns how many were removed.
    pub async fn remove_dangling_images(&self) -> Result<usize, AgentError> {
        let images = self.runtime.list_dangling_images().await?;

        let mut removed = 0;
        for image in &images {
            info!("Removing dangling image {}", image.id);
            match self.runtime.remove_image(&image.id, true).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove image {}: {}", image.id, e),
            }
        }
        Ok(removed)
    }

    /// Run [`Self::remove_exited_containers`] in the background
    pub fn spawn_remove_exited(&self) -> JoinHandle<()> {
        let janitor = self.clone();
        tokio::spawn(async move {
            match janitor.remove_exited_containers().await {
                Ok(n) => debug!("Exited container cleanup finished, {} removed", n),
                Err(e) => warn!("Exited container cleanup failed: {}", e),
            }
        })
    }

    /// Run [`Self::remove_dangling_images`] in the background
    pub fn spawn_remove_dangling(&self) -> JoinHandle<()> {
        let janitor = self.clone();
        tokio::spawn(async move {
            match janitor.remove_dangling_images().await {
                Ok(n) => debug!("Dangling image cleanup finished, {} removed", n),
                Err(e) => warn!("Dangling image cleanup failed: {}", e),
            }
        })
    }
}
