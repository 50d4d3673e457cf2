//! Deployment models

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Desired state for one container, as received in an event or loaded from
/// a deployment record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentIntent {
    /// Kind tag, carried through untouched
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub spec: ReplicaSpec,

    pub container: ContainerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

/// Replica count is accepted but not enforced on a single host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSpec {
    #[serde(default)]
    pub replicas: u32,
}

/// The container to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub image: String,

    /// Host IP the published port binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<String>,

    /// Explicit variables, in order
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,

    /// Secrets resolved from the process environment at deploy time
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Reference to a secret in the secret backend.
///
/// `secret_value` is accepted on input but never serialized, so a persisted
/// record carries no secret material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    #[serde(default)]
    pub secret_path: String,

    pub secret_key: String,

    #[serde(default, skip_serializing)]
    pub secret_value: Option<String>,
}

impl DeploymentIntent {
    /// Check the fields every deploy needs
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.container.image.trim().is_empty() {
            return Err(AgentError::ValidationError(
                "container image is required".to_string(),
            ));
        }
        if self.container.name.trim().is_empty() {
            return Err(AgentError::ValidationError(
                "container name is required".to_string(),
            ));
        }
        Ok(())
    }

    /// The container port to publish, if any
    pub fn published_port(&self) -> Option<&str> {
        self.container
            .container_port
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}
