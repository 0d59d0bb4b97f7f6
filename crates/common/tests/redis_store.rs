//! Exercises `RedisStore` against a live server. Skipped unless
//! `NEXUS_TEST_REDIS_URL` points at a disposable instance.

use std::time::Duration;

use anyhow::Result;
use nexus_common::{QueueStore, RedisStore};
use uuid::Uuid;

async fn connect() -> Result<Option<RedisStore>> {
    let Ok(url) = std::env::var("NEXUS_TEST_REDIS_URL") else {
        return Ok(None);
    };
    Ok(Some(RedisStore::connect(&url).await?))
}

#[tokio::test]
async fn inbox_pops_oldest_first() -> Result<()> {
    let Some(store) = connect().await? else {
        return Ok(());
    };
    let list = format!("test-inbox-{}", Uuid::new_v4());
    store.enqueue(&list, "first".into()).await?;
    store.enqueue(&list, "second".into()).await?;

    assert_eq!(store.dequeue(&list).await?.as_deref(), Some("first"));
    assert_eq!(store.dequeue(&list).await?.as_deref(), Some("second"));
    assert_eq!(store.dequeue(&list).await?, None);
    Ok(())
}

#[tokio::test]
async fn claim_and_capped_lists() -> Result<()> {
    let Some(store) = connect().await? else {
        return Ok(());
    };
    let suffix = Uuid::new_v4();
    let key = format!("test-instance-{suffix}");
    assert!(store.set_if_absent(&key, "a".into(), Duration::from_secs(5)).await?);
    assert!(!store.set_if_absent(&key, "b".into(), Duration::from_secs(5)).await?);
    assert!(store.delete(&key).await?);

    let logs = format!("test-logs-{suffix}");
    for i in 0..4 {
        store.push_capped(&logs, format!("{i}"), 2).await?;
    }
    assert_eq!(store.recent(&logs, 10).await?, vec!["3", "2"]);
    store.delete(&logs).await?;

    let set = format!("test-schedule-{suffix}");
    store.schedule(&set, "a", 10).await?;
    store.schedule(&set, "b", 20).await?;
    assert_eq!(store.take_due(&set, 15, 10).await?, vec!["a"]);
    assert!(store.unschedule(&set, "b").await?);
    Ok(())
}
