//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::bus::jetstream::JetStreamOptions;
use crate::deploy::reconciler::ReconcilerOptions;
use crate::runtime::docker::RegistryAuth;
use crate::secrets::infisical::InfisicalConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::dispatcher;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Where deployment records live
    pub storage: StorageLayout,

    /// Container registry credentials sent with every pull
    pub registry: RegistryAuth,

    /// Message bus consumer
    pub bus: JetStreamOptions,

    /// Secret backend
    pub secrets: InfisicalConfig,

    /// Reconciler behaviour
    pub reconciler: ReconcilerOptions,

    /// Dispatcher worker options
    pub dispatcher: dispatcher::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::new(&settings.data_dir),
            registry: RegistryAuth {
                server_address: settings.docker_private_registry.clone(),
                username: settings.docker_username.clone(),
                password: SecretString::from(settings.docker_password.clone()),
            },
            bus: JetStreamOptions {
                url: settings.nats_url.clone(),
                stream_name: settings.nats_jetstream_name.clone(),
                consumer_name: settings.nats_consumer_name.clone(),
                filter_subject: settings.nats_filter_subject.clone(),
            },
            secrets: InfisicalConfig {
                site_url: settings.infisical_site_url.clone(),
                client_id: settings.infisical_client_id.clone(),
                client_secret: SecretString::from(settings.infisical_client_secret.clone()),
                project_id: settings.infisical_project_id.clone(),
                environment: settings.infisical_environment.clone(),
            },
            reconciler: ReconcilerOptions {
                network_name: settings.network_name.clone(),
                cleanup_on_deploy: settings.cleanup_on_deploy,
                ..Default::default()
            },
            dispatcher: dispatcher::Options::default(),
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including in-flight deploys
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
