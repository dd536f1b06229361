use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::SnapshotError;
use crate::storage::KeyValueStore;

/// Well-known key of the persisted session snapshot.
pub const SNAPSHOT_KEY: &str = "snap";

/// Base64 snapshot blob on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether a snapshot is stored, without decoding it.
    pub fn exists(&self) -> bool {
        match self.store.get(SNAPSHOT_KEY) {
            Ok(value) => value.is_some_and(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read persisted snapshot: {}", e);
                false
            }
        }
    }

    /// Decoded snapshot bytes, `None` when nothing is stored.
    pub fn load(&self) -> Result<Option<Vec<u8>>, SnapshotError> {
        let Some(encoded) = self.store.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        if encoded.is_empty() {
            return Ok(None);
        }
        STANDARD
            .decode(encoded.trim())
            .map(Some)
            .map_err(|e| SnapshotError::Decode(e.to_string()))
    }

    pub fn save(&self, snapshot: &[u8]) -> Result<(), SnapshotError> {
        self.store.set(SNAPSHOT_KEY, &STANDARD.encode(snapshot))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SnapshotError> {
        self.store.remove(SNAPSHOT_KEY)?;
        Ok(())
    }
}
