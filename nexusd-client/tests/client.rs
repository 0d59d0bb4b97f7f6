use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nexus_common::keys::{answer_key, result_key, INBOX_KEY};
use nexus_common::{InboxEntry, MemoryStore, Origin, QueueStore, ScheduledJob, TaskResult};
use nexusd_client::NexusClient;
use serde_json::json;

#[tokio::test]
async fn submit_pushes_an_entry_with_a_fresh_request_id() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let client = NexusClient::new(store.clone());

    let params = json!({ "command": "uptime" }).as_object().cloned();
    let first = client.submit("run uptime", Origin::ToolProtocol, params).await?;
    let second = client.submit("status", Origin::ChatChannel, None).await?;
    assert_ne!(first, second);

    let raw = store.dequeue(INBOX_KEY).await?.expect("entry queued");
    let entry: InboxEntry = serde_json::from_str(&raw)?;
    assert_eq!(entry.request_id.as_deref(), Some(first.as_str()));
    assert_eq!(entry.origin, Origin::ToolProtocol);
    assert_eq!(entry.parameters.expect("params")["command"], "uptime");
    Ok(())
}

#[tokio::test]
async fn fire_and_forget_carries_no_request_id() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let client = NexusClient::new(store.clone());
    client.fire_and_forget("docker prune", Origin::DaemonSelf, None).await?;

    let raw = store.dequeue(INBOX_KEY).await?.expect("entry queued");
    assert!(!raw.contains("requestId"));
    Ok(())
}

#[tokio::test]
async fn wait_answer_sees_a_late_answer() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let client = NexusClient::new(store.clone());

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let answer = serde_json::to_string(&TaskResult::ok("done")).unwrap();
        writer
            .set_with_ttl(&answer_key("r1"), answer, Duration::from_secs(60))
            .await
            .unwrap();
    });

    let answer = client
        .wait_answer("r1", Duration::from_secs(2), Duration::from_millis(5))
        .await?;
    assert_eq!(answer.map(|a| a.message), Some("done".to_string()));
    Ok(())
}

#[tokio::test]
async fn missing_answer_is_unknown_not_failure() -> Result<()> {
    let client = NexusClient::new(Arc::new(MemoryStore::new()));
    let answer = client
        .wait_answer("never", Duration::from_millis(40), Duration::from_millis(10))
        .await?;
    assert!(answer.is_none());
    Ok(())
}

#[tokio::test]
async fn garbage_answer_is_reported() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.set(&answer_key("bad"), "not json".into()).await?;
    let client = NexusClient::new(store);
    assert!(client.answer("bad").await.is_err());
    Ok(())
}

#[tokio::test]
async fn jobs_can_be_scheduled_cancelled_and_read_back() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let client = NexusClient::new(store.clone());

    let job = ScheduledJob::after("nightly backup", Duration::from_secs(3600))
        .every(Duration::from_secs(86_400))
        .with_intent("shell_command", "shell");
    let job_id = client.schedule(&job).await?;
    assert!(client.pending_job(&job_id).await?.is_some());
    assert!(client.cancel(&job_id).await?);
    assert!(!client.cancel(&job_id).await?);
    assert!(client.pending_job(&job_id).await?.is_none());

    let stored = serde_json::to_string(&TaskResult::failed("exit 1"))?;
    store
        .set_with_ttl(&result_key(&job_id), stored, Duration::from_secs(60))
        .await?;
    let result = client.job_result(&job_id).await?.expect("result");
    assert!(!result.succeeded);

    assert!(client.schedule(&ScheduledJob::at("  ", 0)).await.is_err());
    Ok(())
}
