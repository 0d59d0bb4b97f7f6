use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_brain::{select_tier, Brain, ModelTier};
use nexus_common::{Intent, TaskResult};
use nexus_router::{Handler, GENERIC_SYSTEM_PROMPT};
use serde_json::json;
use tracing::warn;

/// Direct model answer at the tier for the intent's kind.
pub struct AskHandler {
    brain: Arc<Brain>,
}

impl AskHandler {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }
}

#[async_trait]
impl Handler for AskHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let prompt = intent.param_str("prompt").unwrap_or(intent.raw.as_str());
        let tier = match select_tier(&intent.kind) {
            ModelTier::None => ModelTier::Cheap,
            tier => tier,
        };
        let max_tokens = intent.param_u64("maxTokens").map(|n| n.min(u32::MAX as u64) as u32);

        match self
            .brain
            .think(prompt, Some(GENERIC_SYSTEM_PROMPT), tier, max_tokens)
            .await
        {
            Ok(answer) => Ok(TaskResult::ok_with(answer, json!({ "tier": tier }))),
            Err(err) => {
                warn!(error = %err, %tier, "Ask failed");
                Ok(TaskResult::failed(format!("model call failed: {err}")))
            }
        }
    }
}
