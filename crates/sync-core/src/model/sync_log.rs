use serde::{Deserialize, Serialize};

use super::sync_config::SyncDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
    Initial,
}

/// Most recent N of these are retained per `SyncConfig` (see
/// `SyncLog::RETENTION_LIMIT`); older entries are pruned after a
/// successful write of a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: uuid::Uuid,
    pub sync_config_id: uuid::Uuid,
    pub outcome: SyncLogOutcome,
    pub direction: SyncDirection,
    pub trigger: SyncTrigger,
    pub records_synced: u32,
    pub records_failed: u32,
    /// Bounded: see `SyncLog::MAX_ERRORS`.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl SyncLog {
    pub const RETENTION_LIMIT: usize = 100;
    pub const MAX_ERRORS: usize = 20;

    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < Self::MAX_ERRORS {
            self.errors.push(message.into());
        }
        self.records_failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_error_caps_at_max() {
        let mut log = SyncLog {
            id: uuid::Uuid::nil(),
            sync_config_id: uuid::Uuid::nil(),
            outcome: SyncLogOutcome::Partial,
            direction: SyncDirection::Bidirectional,
            trigger: SyncTrigger::Manual,
            records_synced: 0,
            records_failed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: chrono::Utc::now(),
            completed_at: chrono::Utc::now(),
        };
        for i in 0..30 {
            log.push_error(format!("error {i}"));
        }
        assert_eq!(log.errors.len(), SyncLog::MAX_ERRORS);
        assert_eq!(log.records_failed, 30);
    }
}
