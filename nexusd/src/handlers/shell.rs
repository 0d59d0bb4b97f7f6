use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_common::limits::resolve_exec_limits;
use nexus_common::{Intent, TaskResult};
use nexus_gate::CommandGate;
use nexus_router::Handler;
use tracing::{debug, warn};

const MESSAGE_PREVIEW: usize = 2_000;

pub struct ShellHandler {
    gate: Arc<CommandGate>,
    configured: (Option<u64>, Option<u64>),
}

impl ShellHandler {
    pub fn new(gate: Arc<CommandGate>, configured: (Option<u64>, Option<u64>)) -> Self {
        Self { gate, configured }
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MESSAGE_PREVIEW {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MESSAGE_PREVIEW).collect();
    cut.push('…');
    cut
}

#[async_trait]
impl Handler for ShellHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let Some(command) = intent.param_str("command") else {
            return Ok(TaskResult::failed("shell requires a 'command' parameter"));
        };

        let (limits, sources) = resolve_exec_limits(
            intent.param_u64("timeoutMs"),
            intent.param_u64("maxOutputBytes"),
            self.configured,
        );
        debug!(
            timeout_ms = limits.timeout_ms,
            timeout_src = sources.timeout_ms,
            max_output_bytes = limits.max_output_bytes,
            max_output_src = sources.max_output_bytes,
            "Shell limits resolved"
        );

        let output = match self
            .gate
            .execute(command, limits.timeout_ms, limits.max_output_bytes as usize)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "Shell command not completed");
                return Ok(TaskResult::failed(err.to_string()));
            }
        };

        let payload = serde_json::to_value(&output)?;
        if output.success() {
            let message = if output.stdout.trim().is_empty() {
                format!("command finished ({})", output.exit_summary())
            } else {
                preview(&output.stdout)
            };
            Ok(TaskResult::ok_with(message, payload))
        } else {
            let detail = if output.stderr.trim().is_empty() {
                preview(&output.stdout)
            } else {
                preview(&output.stderr)
            };
            Ok(TaskResult::failed_with(
                format!("command failed ({}): {}", output.exit_summary(), detail),
                payload,
            ))
        }
    }
}
