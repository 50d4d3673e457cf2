//! Secret loader
//!
//! Walks the secret backend two levels below the root and exports every
//! secret found into the process environment, keyed by secret name. The
//! reconciler reads those variables when it resolves secret references.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::secrets::{Secret, SecretBackend};

/// Root of the secret hierarchy
pub const ROOT_PATH: &str = "/";

/// Result of one load pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Folders visited, root first
    pub folders: Vec<String>,
    /// Secrets exported to the environment
    pub loaded: usize,
    /// Folders whose secrets could not be fetched
    pub failed_folders: Vec<String>,
}

/// Where loaded secrets are written
pub trait SecretSink: Send + Sync {
    fn export(&self, key: &str, value: &str);
}

/// Writes secrets into the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl SecretSink for ProcessEnv {
    fn export(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

pub struct SecretLoader {
    backend: Arc<dyn SecretBackend>,
    sink: Arc<dyn SecretSink>,
}

impl SecretLoader {
    /// Loader exporting into the process environment
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self::with_sink(backend, Arc::new(ProcessEnv))
    }

    pub fn with_sink(backend: Arc<dyn SecretBackend>, sink: Arc<dyn SecretSink>) -> Self {
        Self { backend, sink }
    }

    /// Discover folders at most two levels below the root.
    ///
    /// Failing to list the root is an error; a child whose subfolders cannot
    /// be listed is still visited itself.
    pub async fn discover_folders(&self) -> Result<Vec<String>, AgentError> {
        let children = self.backend.list_folders(ROOT_PATH).await?;

        let mut folders = vec![ROOT_PATH.to_string()];
        for child in children {
            let child_path = format!("/{}", child.name);

            let grandchildren = match self.backend.list_folders(&child_path).await {
                Ok(grandchildren) => grandchildren,
                Err(e) => {
                    warn!("Error listing folders under {}: {}", child_path, e);
                    Vec::new()
                }
            };

            folders.push(child_path.clone());
            folders.extend(
                grandchildren
                    .into_iter()
                    .map(|g| format!("{}/{}", child_path, g.name)),
            );
        }

        Ok(folders)
    }

    /// Load every discovered folder concurrently and export its secrets.
    ///
    /// Waits for all folders. A folder that fails is logged and skipped.
    pub async fn load_all(&self) -> Result<LoadReport, AgentError> {
        let folders = self.discover_folders().await?;

        let fetches = folders.iter().map(|folder| async move {
            (folder.as_str(), self.backend.list_secrets(folder).await)
        });
        let results = join_all(fetches).await;

        let mut report = LoadReport {
            folders: folders.clone(),
            ..Default::default()
        };

        for (folder, result) in results {
            match result {
                Ok(secrets) => {
                    report.loaded += self.export(folder, &secrets);
                }
                Err(e) => {
                    warn!("Error loading secrets from {}: {}", folder, e);
                    report.failed_folders.push(folder.to_string());
                }
            }
        }

        info!(
            "Loaded {} secret(s) from {} folder(s), {} folder(s) failed",
            report.loaded,
            report.folders.len(),
            report.failed_folders.len()
        );
        Ok(report)
    }

    fn export(&self, folder: &str, secrets: &[Secret]) -> usize {
        let mut names = Vec::with_capacity(secrets.len());
        for secret in secrets {
            if !is_exportable(secret) {
                warn!("Skipping secret {:?} from {}: not a valid variable", secret.key, folder);
                continue;
            }
            self.sink.export(&secret.key, &secret.value);
            names.push(secret.key.as_str());
        }
        debug!("Secrets loaded from {}: {} secrets: {:?}", folder, names.len(), names);
        names.len()
    }
}

/// `set_var` panics on these
fn is_exportable(secret: &Secret) -> bool {
    !secret.key.is_empty()
        && !secret.key.contains(['=', '\0'])
        && !secret.value.contains('\0')
}
