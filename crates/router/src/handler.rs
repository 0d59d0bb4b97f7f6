use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_common::{Intent, TaskResult};

/// Capability behind one action key.
///
/// Expected failures come back as `TaskResult { succeeded: false }`; `Err`
/// is reserved for unexpected internal faults.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, intent: Intent) -> Result<TaskResult>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Intent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskResult>> + Send + 'static,
{
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        (self)(intent).await
    }
}

/// Action key to handler. Registering an existing key replaces the handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    order: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered under `action`, if any.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        let action = action.into();
        let previous = self.handlers.insert(action.clone(), handler);
        if previous.is_none() {
            self.order.push(action);
        }
        previous
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered actions in first-registration order.
    pub fn actions(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
