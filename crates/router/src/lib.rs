//! Intent router: free text to [`Intent`], then intent to handler.
//!
//! Classification tries the ordered rule list first, then a cheap-tier
//! model call, and finally degrades to a freeform ask. It never fails.
//! Routing looks the action up in the [`HandlerRegistry`]; a miss is
//! answered directly by the model.

pub mod fallback;
pub mod handler;
pub mod rules;

use std::sync::Arc;

use anyhow::Result;
use nexus_brain::{select_tier, Brain, ModelTier};
use nexus_common::{Intent, IntentHint, Origin, TaskResult};
use serde_json::json;
use tracing::{debug, info, warn};

pub use fallback::{classification_prompt, parse_model_intent, GENERIC_SYSTEM_PROMPT};
pub use handler::{Handler, HandlerRegistry};
pub use rules::{default_rules, normalize, ClassificationRule, RuleMatch};

const CLASSIFY_MAX_TOKENS: u32 = 256;

pub struct Router {
    rules: Vec<ClassificationRule>,
    registry: HandlerRegistry,
    brain: Arc<Brain>,
}

impl Router {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self::with_rules(brain, default_rules())
    }

    pub fn with_rules(brain: Arc<Brain>, rules: Vec<ClassificationRule>) -> Self {
        Self {
            rules,
            registry: HandlerRegistry::new(),
            brain,
        }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    /// Register `handler` for `action`, replacing any earlier registration.
    pub fn register<H>(&mut self, action: impl Into<String>, handler: H) -> Option<Arc<dyn Handler>>
    where
        H: Handler + 'static,
    {
        self.register_shared(action, Arc::new(handler))
    }

    pub fn register_shared(&mut self, action: impl Into<String>, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        let action = action.into();
        let previous = self.registry.register(action.clone(), handler);
        if previous.is_some() {
            debug!(%action, "Handler replaced");
        }
        previous
    }

    pub async fn classify(&self, input: &str, origin: Origin) -> Intent {
        if let Some((rule, intent)) = rules::classify_with(&self.rules, input, origin) {
            debug!(%rule, action = %intent.action, "Classified by rule");
            return intent;
        }

        let system = classification_prompt(self.registry.actions());
        match self
            .brain
            .think(input, Some(&system), ModelTier::Cheap, Some(CLASSIFY_MAX_TOKENS))
            .await
        {
            Ok(reply) => match parse_model_intent(&reply, origin, input) {
                Some(intent) => {
                    debug!(action = %intent.action, kind = %intent.kind, "Classified by model");
                    intent
                }
                None => {
                    debug!("Model classification unparsable; using freeform ask");
                    Intent::freeform(origin, input)
                }
            },
            Err(err) => {
                warn!(error = %err, "Model classification failed; using freeform ask");
                Intent::freeform(origin, input)
            }
        }
    }

    /// Build an intent from a pre-classified hint, skipping classification.
    pub fn from_hint(&self, hint: &IntentHint, input: &str, origin: Origin) -> Intent {
        Intent::new(hint.kind.clone(), hint.action.clone(), origin, input)
    }

    /// Dispatch to the registered handler, or answer with the model on a miss.
    /// Handler errors propagate.
    pub async fn route(&self, intent: Intent) -> Result<TaskResult> {
        if let Some(handler) = self.registry.get(&intent.action) {
            return handler.handle(intent).await;
        }

        let tier = match select_tier(&intent.kind) {
            ModelTier::None => ModelTier::Cheap,
            tier => tier,
        };
        info!(action = %intent.action, %tier, "No handler registered; answering with model");
        let answer = self
            .brain
            .think(&intent.raw, Some(GENERIC_SYSTEM_PROMPT), tier, None)
            .await?;
        Ok(TaskResult::ok_with(
            answer,
            json!({ "fallback": "model", "tier": tier, "action": intent.action }),
        ))
    }
}
