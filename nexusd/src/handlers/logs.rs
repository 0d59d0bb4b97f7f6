use anyhow::Result;
use async_trait::async_trait;
use nexus_common::{Intent, TaskResult};
use nexus_router::Handler;
use serde_json::json;

use crate::log_mirror::LogMirror;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 500;

pub struct LogsHandler {
    mirror: LogMirror,
}

impl LogsHandler {
    pub fn new(mirror: LogMirror) -> Self {
        Self { mirror }
    }
}

#[async_trait]
impl Handler for LogsHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let limit = intent.param_u64("limit").unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let lines = self.mirror.recent(limit as usize).await?;
        if lines.is_empty() {
            return Ok(TaskResult::ok_with("no log lines yet", json!({ "lines": [] })));
        }
        let text = lines
            .iter()
            .map(|line| format!("{} [{}] {}", line.ts, line.level, line.message))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(TaskResult::ok_with(text, json!({ "lines": lines })))
    }
}
