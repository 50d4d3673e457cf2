//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::deploy::reconciler::{Reconciler, ReconcilerOptions};
use crate::errors::AgentError;
use crate::runtime::ContainerRuntime;
use crate::secrets::loader::SecretLoader;
use crate::secrets::SecretBackend;
use crate::storage::layout::StorageLayout;
use crate::storage::records::RecordStore;
use crate::workers::dispatcher::Handlers;

/// Shared components wired over the external clients
pub struct AppState {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub records: Arc<RecordStore>,
    pub reconciler: Arc<Reconciler>,
    pub loader: Arc<SecretLoader>,
}

impl AppState {
    /// Wire the state over already-connected clients. Secrets are exported to
    /// the process environment.
    pub async fn init(
        layout: &StorageLayout,
        runtime: Arc<dyn ContainerRuntime>,
        secret_backend: Arc<dyn SecretBackend>,
        reconciler_options: ReconcilerOptions,
    ) -> Result<Self, AgentError> {
        Self::init_with_loader(
            layout,
            runtime,
            Arc::new(SecretLoader::new(secret_backend)),
            reconciler_options,
        )
        .await
    }

    /// Same as [`Self::init`] with a caller-provided loader
    pub async fn init_with_loader(
        layout: &StorageLayout,
        runtime: Arc<dyn ContainerRuntime>,
        loader: Arc<SecretLoader>,
        reconciler_options: ReconcilerOptions,
    ) -> Result<Self, AgentError> {
        layout.setup().await?;
        let records = Arc::new(RecordStore::new(layout.records_dir()));
        info!("Deployment records stored in {:?}", records.dir().path());

        let reconciler = Arc::new(Reconciler::new(
            runtime.clone(),
            records.clone(),
            reconciler_options,
        ));

        Ok(Self {
            runtime,
            records,
            reconciler,
            loader,
        })
    }

    /// Handlers the dispatcher routes events to
    pub fn handlers(&self) -> Handlers {
        Handlers {
            reconciler: self.reconciler.clone(),
            loader: self.loader.clone(),
            records: self.records.clone(),
        }
    }
}
