//! Mirror of the daemon's operational log lines into the shared `logs` list.
//!
//! Lines are JSON objects `{ts, level, message}`, newest first, trimmed to a
//! fixed cap. Store failures are swallowed: mirroring never fails a cycle.

use std::sync::Arc;

use nexus_common::keys::LOGS_KEY;
use nexus_common::QueueStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: String,
    pub level: String,
    pub message: String,
}

#[derive(Clone)]
pub struct LogMirror {
    store: Arc<dyn QueueStore>,
    cap: usize,
}

impl LogMirror {
    pub fn new(store: Arc<dyn QueueStore>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.record("info", message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.record("warn", message.into()).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.record("error", message.into()).await;
    }

    async fn record(&self, level: &str, message: String) {
        let line = LogLine {
            ts: chrono::Utc::now().to_rfc3339(),
            level: level.to_string(),
            message,
        };
        let encoded = match serde_json::to_string(&line) {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(error = %err, "Log line not encodable");
                return;
            }
        };
        if let Err(err) = self.store.push_capped(LOGS_KEY, encoded, self.cap).await {
            debug!(error = %err, "Log mirror write failed");
        }
    }

    /// Up to `limit` mirrored lines, newest first. Undecodable lines are
    /// returned as plain messages.
    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<LogLine>> {
        let raw = self.store.recent(LOGS_KEY, limit).await?;
        Ok(raw
            .into_iter()
            .map(|line| {
                serde_json::from_str(&line).unwrap_or(LogLine {
                    ts: String::new(),
                    level: "info".to_string(),
                    message: line,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_common::MemoryStore;

    #[tokio::test]
    async fn lines_are_capped_newest_first() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mirror = LogMirror::new(store.clone(), 3);
        for i in 0..5 {
            mirror.info(format!("line {i}")).await;
        }
        mirror.error("boom").await;

        let lines = mirror.recent(10).await?;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "boom");
        assert_eq!(lines[0].level, "error");
        assert_eq!(lines[2].message, "line 3");
        assert_eq!(store.list_len(LOGS_KEY).await?, 3);
        Ok(())
    }
}
