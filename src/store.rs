use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::TrackId;
use crate::error::StoreError;

/// Queue and recency ids, serialized after every scheduler mutation and
/// reloaded at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub queue: Vec<TrackId>,
    #[serde(default)]
    pub recent: Vec<TrackId>,
}

/// Capability interface to the durable state slot.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState, StoreError>;

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// JSON-on-disk state slot.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        let raw = tokio::fs::read(&self.path).await?;
        let state = serde_json::from_slice(&raw)?;
        debug!(path = %self.path.display(), "Loaded persisted state");
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
