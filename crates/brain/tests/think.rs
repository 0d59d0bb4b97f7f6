use std::sync::Arc;

use anyhow::Result;
use nexus_brain::testing::ScriptedBackend;
use nexus_brain::{Brain, BrainError, ModelTier, TierModels, DEFAULT_MAX_OUTPUT_TOKENS};

#[tokio::test]
async fn tier_none_skips_the_backend() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let brain = Brain::new(backend.clone());

    let answer = brain.think("list containers", None, ModelTier::None, None).await?;
    assert_eq!(answer, "");
    assert_eq!(backend.call_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn tier_resolves_to_configured_model() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_reply("42").await;
    let brain = Brain::new(backend.clone())
        .with_models(TierModels::default().with_override(ModelTier::Balanced, "house-model"));

    let answer = brain
        .think("meaning of life?", Some("be brief"), ModelTier::Balanced, Some(64))
        .await?;
    assert_eq!(answer, "42");

    let requests = backend.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "house-model");
    assert_eq!(requests[0].system.as_deref(), Some("be brief"));
    assert_eq!(requests[0].max_tokens, 64);
    Ok(())
}

#[tokio::test]
async fn failures_propagate_without_retry() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_error("503 upstream").await;
    let brain = Brain::new(backend.clone());

    let err = brain
        .think("hello", None, ModelTier::Cheap, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BrainError::RequestFailed { ref reason, .. } if reason == "503 upstream"));
    assert_eq!(backend.call_count().await, 1);
    assert_eq!(backend.requests().await[0].max_tokens, DEFAULT_MAX_OUTPUT_TOKENS);
    Ok(())
}
