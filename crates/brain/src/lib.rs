//! Model tier selection.
//!
//! [`Brain::think`] resolves a [`ModelTier`] to a concrete model through a
//! static table and issues exactly one generation call on the configured
//! [`LlmBackend`]. There is no retry and no caller-side timeout.

pub mod tier;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub use tier::{select_tier, ModelTier, TierModels};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("no model configured for tier '{0}'")]
    NoModel(ModelTier),

    #[error("{backend} request failed: {reason}")]
    RequestFailed { backend: String, reason: String },

    #[error("invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String, BrainError>;
}

pub struct Brain {
    backend: Arc<dyn LlmBackend>,
    models: TierModels,
    default_max_tokens: u32,
}

impl Brain {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            models: TierModels::default(),
            default_max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_models(mut self, models: TierModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens.max(1);
        self
    }

    pub fn models(&self) -> &TierModels {
        &self.models
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn think(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        tier: ModelTier,
        max_output_tokens: Option<u32>,
    ) -> Result<String, BrainError> {
        if tier == ModelTier::None {
            return Ok(String::new());
        }
        let model = self
            .models
            .model_for(tier)
            .ok_or(BrainError::NoModel(tier))?
            .to_string();

        debug!(%tier, %model, backend = self.backend.name(), "Model call");
        self.backend
            .generate(GenerationRequest {
                model,
                system: system_prompt.map(str::to_string),
                prompt: prompt.to_string(),
                max_tokens: max_output_tokens.unwrap_or(self.default_max_tokens),
            })
            .await
    }
}
