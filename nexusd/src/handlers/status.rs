use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_common::keys::INBOX_KEY;
use nexus_common::{now_ms, Intent, QueueStore, TaskResult};
use nexus_router::Handler;
use serde_json::json;

use super::StatusProbe;

pub struct StatusHandler {
    probe: StatusProbe,
    store: Arc<dyn QueueStore>,
}

impl StatusHandler {
    pub fn new(probe: StatusProbe, store: Arc<dyn QueueStore>) -> Self {
        Self { probe, store }
    }
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, _intent: Intent) -> Result<TaskResult> {
        let stats = self.probe.stats(now_ms()).await;
        let inbox_depth = self.store.list_len(INBOX_KEY).await?;
        let state = self.probe.state();

        Ok(TaskResult::ok_with(
            format!(
                "{} for {}s; processed {} ({} failed, {} faults); inbox depth {}",
                state, stats.uptime_secs, stats.processed, stats.failed, stats.faults, inbox_depth
            ),
            json!({
                "state": state,
                "inboxDepth": inbox_depth,
                "stats": stats,
            }),
        ))
    }
}
