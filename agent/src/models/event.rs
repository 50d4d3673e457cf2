//! CloudEvents envelope and subject classification

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Subject carrying a newly built image to deploy
pub const SUBJECT_IMAGE_CREATED: &str = "Stack.Containers.ImageCreated";

/// Subject announcing a secret rotation
pub const SUBJECT_SECRET_ROTATED: &str = "Stack.Secrets.NewSecret2";

/// What the dispatch loop does with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ImageCreated,
    SecretRotated,
    Unrecognized,
}

impl EventKind {
    /// Classify a message by its bus subject
    pub fn from_subject(subject: &str) -> Self {
        match subject {
            SUBJECT_IMAGE_CREATED => EventKind::ImageCreated,
            SUBJECT_SECRET_ROTATED => EventKind::SecretRotated,
            _ => EventKind::Unrecognized,
        }
    }
}

/// CloudEvents 1.0 structured-mode JSON envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    #[serde(default = "default_spec_version")]
    pub specversion: String,

    pub id: String,

    pub source: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

fn default_spec_version() -> String {
    "1.0".to_string()
}

impl CloudEvent {
    /// Decode an envelope from raw message bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AgentError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode the event payload, from `data` or `data_base64`
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        if let Some(data) = &self.data {
            // Some producers send the JSON document as a string
            if let serde_json::Value::String(raw) = data {
                return Ok(serde_json::from_str(raw)?);
            }
            return Ok(T::deserialize(data)?);
        }

        if let Some(encoded) = &self.data_base64 {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| AgentError::ValidationError(format!("invalid data_base64: {e}")))?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        Err(AgentError::ValidationError(format!(
            "event {} carries no data",
            self.id
        )))
    }
}
