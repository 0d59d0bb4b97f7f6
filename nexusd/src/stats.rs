use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregate counters, persisted to `stats` periodically and on stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStats {
    pub instance_id: String,
    pub started_at_ms: i64,
    pub uptime_secs: u64,
    pub cycles: u64,
    pub idle_cycles: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub faults: u64,
    pub cleanups: u64,
    pub jobs_fired: u64,
    pub last_processed_at_ms: Option<i64>,
    pub per_action: BTreeMap<String, u64>,
}

impl DaemonStats {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    pub fn record_result(&mut self, action: &str, succeeded: bool, now_ms: i64) {
        self.processed += 1;
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        *self.per_action.entry(action.to_string()).or_default() += 1;
        self.last_processed_at_ms = Some(now_ms);
    }

    /// Copy with `uptime_secs` computed against `now_ms`.
    pub fn snapshot(&self, now_ms: i64) -> Self {
        let mut snapshot = self.clone();
        snapshot.uptime_secs = if self.started_at_ms > 0 {
            ((now_ms - self.started_at_ms).max(0) / 1_000) as u64
        } else {
            0
        };
        snapshot
    }
}
