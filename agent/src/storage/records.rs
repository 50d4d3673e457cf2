//! Deployment record store
//!
//! One JSON file per deployed container, named after the container ID and
//! holding the intent that produced it. Point lookups only; callers keep a
//! single writer per key.

use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentIntent;

const RECORD_EXT: &str = "json";

/// Durable container ID -> deployment intent mapping
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: Dir,
}

impl RecordStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// Write the record for `id`, replacing any previous one
    pub async fn put(&self, id: &str, intent: &DeploymentIntent) -> Result<(), AgentError> {
        let file = self.record_file(id)?;
        file.write_json(intent).await?;
        debug!(container_id = %id, "Saved deployment record");
        Ok(())
    }

    /// Load the record for `id`
    pub async fn get(&self, id: &str) -> Result<DeploymentIntent, AgentError> {
        let file = self.record_file(id)?;
        if !file.exists().await {
            return Err(AgentError::RecordNotFound(id.to_string()));
        }
        file.read_json().await
    }

    /// Remove the record for `id`. A missing record is an error.
    pub async fn delete(&self, id: &str) -> Result<(), AgentError> {
        let file = self.record_file(id)?;
        if !file.delete().await? {
            return Err(AgentError::RecordNotFound(id.to_string()));
        }
        debug!(container_id = %id, "Deleted deployment record");
        Ok(())
    }

    /// IDs of all stored records
    pub async fn list_ids(&self) -> Result<Vec<String>, AgentError> {
        let mut ids: Vec<String> = self
            .dir
            .list_files()
            .await?
            .into_iter()
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn record_file(&self, id: &str) -> Result<File, AgentError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AgentError::StorageError(format!(
                "invalid container id for record key: {:?}",
                id
            )));
        }
        Ok(self.dir.file(&format!("{}.{}", id, RECORD_EXT)))
    }
}
