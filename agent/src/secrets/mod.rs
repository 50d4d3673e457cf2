//! Secret backend boundary and the loader that feeds the process environment

pub mod infisical;
pub mod loader;

use async_trait::async_trait;

use crate::errors::AgentError;

/// A folder in the secret backend's hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFolder {
    pub name: String,
}

/// A key/value secret
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub key: String,
    pub value: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("key", &self.key)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Hierarchical key/value secret store
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Folders directly under `path`
    async fn list_folders(&self, path: &str) -> Result<Vec<SecretFolder>, AgentError>;

    /// Secrets stored directly in `path`
    async fn list_secrets(&self, path: &str) -> Result<Vec<Secret>, AgentError>;
}
