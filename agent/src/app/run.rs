//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::bus::jetstream::{JetStreamFeed, JetStreamOptions};
use crate::errors::AgentError;
use crate::runtime::docker::{DockerRuntime, RegistryAuth};
use crate::runtime::registry;
use crate::secrets::infisical::{InfisicalClient, InfisicalConfig};
use crate::workers::dispatcher;

/// Run the deployment agent until `shutdown_signal` fires or the message
/// feed closes
pub async fn run(
    agent_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing deployment agent {}...", agent_version);

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let feed_closed = match init(&options, &mut shutdown_manager, shutdown_tx.subscribe()).await {
        Ok(feed_closed) => feed_closed,
        Err(e) => {
            error!("Failed to start agent: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
        _ = feed_closed => {
            info!("Dispatcher stopped, shutting down...");
        }
    }

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<oneshot::Receiver<()>, AgentError> {
    let (secret_backend, runtime, feed) = tokio::join!(
        init_secrets(options.secrets.clone()),
        init_runtime(options.registry.clone()),
        init_feed(&options.bus),
    );
    let (secret_backend, runtime, feed) = (secret_backend?, runtime?, feed?);

    let app_state = AppState::init(
        &options.storage,
        Arc::new(runtime),
        Arc::new(secret_backend),
        options.reconciler.clone(),
    )
    .await?;

    info!("Loading secrets...");
    app_state.loader.load_all().await?;

    init_dispatcher_worker(
        options.dispatcher.clone(),
        app_state,
        feed,
        shutdown_manager,
        shutdown_rx,
    )
}

async fn init_secrets(config: InfisicalConfig) -> Result<InfisicalClient, AgentError> {
    info!("Connecting to secret backend at {}...", config.site_url);
    InfisicalClient::connect(config).await
}

async fn init_runtime(auth: RegistryAuth) -> Result<DockerRuntime, AgentError> {
    info!("Connecting to container runtime...");
    registry::verify_login(&auth).await?;
    DockerRuntime::connect(auth).await
}

async fn init_feed(options: &JetStreamOptions) -> Result<JetStreamFeed, AgentError> {
    info!("Connecting to message bus at {}...", options.url);
    let feed = JetStreamFeed::connect(options).await?;

    let status = feed.status();
    info!(
        "Consumer bound: stream={} consumer={} filter={} pending={} ack_pending={}",
        status.stream_name,
        status.consumer_name,
        status.filter_subject,
        status.num_pending,
        status.num_ack_pending
    );
    Ok(feed)
}

fn init_dispatcher_worker(
    options: dispatcher::Options,
    app_state: AppState,
    mut feed: JetStreamFeed,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<oneshot::Receiver<()>, AgentError> {
    info!("Initializing dispatcher worker...");

    let handlers = app_state.handlers();
    let (closed_tx, closed_rx) = oneshot::channel();

    let dispatcher_handle = tokio::spawn(async move {
        dispatcher::run(
            &options,
            &mut feed,
            &handlers,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;

        if let Err(e) = feed.close().await {
            error!("Error closing message feed: {}", e);
        }
        let _ = closed_tx.send(());
    });

    shutdown_manager.with_dispatcher_worker_handle(dispatcher_handle)?;
    Ok(closed_rx)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    dispatcher_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            dispatcher_worker_handle: None,
        }
    }

    pub fn with_dispatcher_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        if self.dispatcher_worker_handle.is_some() {
            return Err(AgentError::ShutdownError(
                "dispatcher_handle already set".to_string(),
            ));
        }
        self.dispatcher_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, abandoning in-flight deploys",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(AgentError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down deployment agent...");

        if let Some(handle) = self.dispatcher_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
