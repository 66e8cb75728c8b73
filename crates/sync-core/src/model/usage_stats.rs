use serde::{Deserialize, Serialize};

/// Monthly usage counters, one row per {user, year_month}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub records_synced: u64,
    pub sync_configs_created: u32,
}

impl UsageStats {
    pub fn zero() -> Self {
        Self {
            records_synced: 0,
            sync_configs_created: 0,
        }
    }

    /// Fraction of `limit` already used, for the scheduler's warn/pause gate.
    /// `limit = 0` is treated as unlimited (Business tier).
    pub fn usage_fraction(&self, limit: u64) -> f64 {
        if limit == 0 {
            return 0.0;
        }
        self.records_synced as f64 / limit as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_plan_never_saturates() {
        let stats = UsageStats {
            records_synced: 1_000_000,
            sync_configs_created: 1,
        };
        assert_eq!(stats.usage_fraction(0), 0.0);
    }

    #[test]
    fn fraction_at_eighty_percent() {
        let stats = UsageStats {
            records_synced: 800,
            sync_configs_created: 1,
        };
        assert!((stats.usage_fraction(1000) - 0.8).abs() < f64::EPSILON);
    }
}
