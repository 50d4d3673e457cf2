//! Error types for the deployment agent

use thiserror::Error;

/// Main error type for the deployment agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Docker error: {0}")]
    DockerError(#[from] bollard::errors::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Secret backend error: {0}")]
    SecretError(String),

    #[error("Message bus error: {0}")]
    BusError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Recreation error: {0}")]
    RecreateError(String),

    #[error("Deployment record not found: {0}")]
    RecordNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<envy::Error> for AgentError {
    fn from(err: envy::Error) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}
