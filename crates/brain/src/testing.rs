//! Scripted [`LlmBackend`] for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{BrainError, GenerationRequest, LlmBackend};

/// Replays queued replies in order and records every request. When the
/// script runs dry it answers with the fallback reply.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    fallback: String,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_fallback("scripted answer")
    }

    pub fn with_fallback(fallback: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: fallback.to_string(),
        }
    }

    pub async fn push_reply(&self, reply: &str) {
        self.replies.lock().await.push_back(Ok(reply.to_string()));
    }

    pub async fn push_error(&self, reason: &str) {
        self.replies.lock().await.push_back(Err(reason.to_string()));
    }

    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, BrainError> {
        self.requests.lock().await.push(request);
        match self.replies.lock().await.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(reason)) => Err(BrainError::RequestFailed {
                backend: "scripted".into(),
                reason,
            }),
            None => Ok(self.fallback.clone()),
        }
    }
}
