//! Agent settings loaded from the process environment

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::AgentError;
use crate::logs::LogLevel;

/// Agent settings.
///
/// Each field maps to the upper-cased environment variable of the same name,
/// e.g. `nats_jetstream_name` is read from `NATS_JETSTREAM_NAME`. Holds
/// credentials, so no `Debug`.
#[derive(Clone, Deserialize)]
pub struct Settings {
    /// Private registry server address used for image pulls
    pub docker_private_registry: String,

    /// Registry user
    pub docker_username: String,

    /// Registry password
    pub docker_password: String,

    /// Message bus URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream carrying deployment events
    pub nats_jetstream_name: String,

    /// Durable consumer name
    #[serde(default = "default_consumer_name")]
    pub nats_consumer_name: String,

    /// Consumer subject filter
    #[serde(default = "default_filter_subject")]
    pub nats_filter_subject: String,

    /// Secret backend client id
    pub infisical_client_id: String,

    /// Secret backend client secret
    pub infisical_client_secret: String,

    /// Secret backend project
    pub infisical_project_id: String,

    /// Secret backend environment slug
    pub infisical_environment: String,

    /// Secret backend base URL
    #[serde(default = "default_infisical_site_url")]
    pub infisical_site_url: String,

    /// Base directory for persisted state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Shared network every managed container joins
    #[serde(default = "default_network_name")]
    pub network_name: String,

    /// Run host cleanup on each deploy attempt
    #[serde(default = "default_true")]
    pub cleanup_on_deploy: bool,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON log output
    #[serde(default)]
    pub log_json: bool,
}

fn default_true() -> bool {
    true
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_consumer_name() -> String {
    "DeploymentManager".to_string()
}

fn default_filter_subject() -> String {
    "Stack.*.*".to_string()
}

fn default_infisical_site_url() -> String {
    "https://app.infisical.com".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_network_name() -> String {
    "bluerobin".to_string()
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_vars(std::env::vars())
    }

    /// Load settings from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Settings = envy::from_iter(vars)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.nats_jetstream_name.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "NATS_JETSTREAM_NAME environment variable not set".to_string(),
            ));
        }
        if self.network_name.trim().is_empty() {
            return Err(AgentError::ConfigError("NETWORK_NAME must not be empty".to_string()));
        }
        Ok(())
    }
}
