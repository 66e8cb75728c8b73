use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-record content hash captured at the end of the last successful run.
/// Covers exactly the records that existed as of that run's completion; a
/// missing checkpoint for a `SyncConfig` is treated as empty, so the first
/// run classifies everything as new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    pub content_hash: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entries: HashMap<String, CheckpointEntry>,
}

impl Checkpoint {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: &str) -> Option<&CheckpointEntry> {
        self.entries.get(record_id)
    }

    pub fn set(&mut self, record_id: String, content_hash: String, captured_at: chrono::DateTime<chrono::Utc>) {
        self.entries.insert(
            record_id,
            CheckpointEntry {
                content_hash,
                captured_at,
            },
        );
    }
}
