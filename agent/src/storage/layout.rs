//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// Where the agent keeps its state under `DATA_DIR`
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding one deployment record per container
    pub fn records_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Create the records directory if missing
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.records_dir().create().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/data")
    }
}
