use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Single-key atomic operations over the shared queue store.
///
/// Lists are newest-first: `enqueue` pushes at the head and `dequeue` pops
/// from the tail, so the oldest entry always comes out first. No operation
/// spans more than one key.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Push a value onto a FIFO list.
    async fn enqueue(&self, list: &str, value: String) -> Result<()>;

    /// Pop the oldest value from a FIFO list without blocking.
    async fn dequeue(&self, list: &str) -> Result<Option<String>>;

    async fn list_len(&self, list: &str) -> Result<usize>;

    /// Push onto a rolling list and trim it to `keep` newest values.
    async fn push_capped(&self, list: &str, value: String, keep: usize) -> Result<()>;

    /// Up to `limit` values from a rolling list, newest first.
    async fn recent(&self, list: &str, limit: usize) -> Result<Vec<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Set only if the key is absent. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Index `member` in a sorted set at `score` (replacing any previous score).
    async fn schedule(&self, set: &str, member: &str, score: i64) -> Result<()>;

    /// Claim up to `limit` members scored at or below `max_score`.
    /// Claimed members are removed from the set; a member is only ever
    /// returned to one caller.
    async fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>>;

    /// Returns whether the member was present.
    async fn unschedule(&self, set: &str, member: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, StoredValue>,
    sorted: HashMap<String, HashMap<String, i64>>,
}

impl MemoryInner {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.values.retain(|_, stored| stored.is_live(now));
    }
}

/// In-process store used by tests and `--memory` mode.
///
/// Expiry uses the tokio clock so paused-time tests can advance past TTLs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value keys, sorted. Test helper for asserting what was written.
    pub async fn keys(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        let mut keys: Vec<String> = inner.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remaining time-to-live for a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock().await;
        let stored = inner.values.get(key)?;
        let deadline = stored.expires_at?;
        deadline.checked_duration_since(Instant::now())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, list: &str, value: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lists.entry(list.to_string()).or_default().push_front(value);
        Ok(())
    }

    async fn dequeue(&self, list: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.lists.get_mut(list).and_then(VecDeque::pop_back))
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn push_capped(&self, list: &str, value: String, keep: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entries = inner.lists.entry(list.to_string()).or_default();
        entries.push_front(value);
        entries.truncate(keep);
        Ok(())
    }

    async fn recent(&self, list: &str, limit: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(list)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.values.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.values.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        if inner.values.contains_key(key) {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        Ok(inner.values.get(key).map(|stored| stored.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        let removed_value = inner.values.remove(key).is_some();
        let removed_list = inner.lists.remove(key).is_some();
        Ok(removed_value || removed_list)
    }

    async fn schedule(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sorted
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let Some(members) = inner.sorted.get_mut(set) else {
            return Ok(Vec::new());
        };

        // Order by (score, member) to match sorted-set iteration.
        let mut due: Vec<(i64, String)> = members
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (*score, member.clone()))
            .collect();
        due.sort();

        let claimed: Vec<String> = due
            .into_iter()
            .take(limit)
            .map(|(_, member)| member)
            .collect();
        for member in &claimed {
            members.remove(member);
        }
        Ok(claimed)
    }

    async fn unschedule(&self, set: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .sorted
            .get_mut(set)
            .map_or(false, |members| members.remove(member).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_returns_oldest_first() -> Result<()> {
        let store = MemoryStore::new();
        store.enqueue("inbox", "first".into()).await?;
        store.enqueue("inbox", "second".into()).await?;

        assert_eq!(store.list_len("inbox").await?, 2);
        assert_eq!(store.dequeue("inbox").await?.as_deref(), Some("first"));
        assert_eq!(store.dequeue("inbox").await?.as_deref(), Some("second"));
        assert_eq!(store.dequeue("inbox").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() -> Result<()> {
        let store = MemoryStore::new();
        store
            .set_with_ttl("answer:r1", "{}".into(), Duration::from_secs(300))
            .await?;
        assert!(store.get("answer:r1").await?.is_some());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.get("answer:r1").await?.is_none());
        assert!(store.keys().await.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_live_values() -> Result<()> {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        assert!(store.set_if_absent("daemon:instance", "a".into(), ttl).await?);
        assert!(!store.set_if_absent("daemon:instance", "b".into(), ttl).await?);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.set_if_absent("daemon:instance", "b".into(), ttl).await?);
        assert_eq!(store.get("daemon:instance").await?.as_deref(), Some("b"));
        Ok(())
    }

    #[tokio::test]
    async fn capped_list_keeps_newest() -> Result<()> {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.push_capped("logs", format!("line {i}"), 3).await?;
        }
        assert_eq!(
            store.recent("logs", 10).await?,
            vec!["line 4", "line 3", "line 2"]
        );
        assert_eq!(store.recent("logs", 1).await?, vec!["line 4"]);
        Ok(())
    }

    #[tokio::test]
    async fn take_due_claims_in_score_order() -> Result<()> {
        let store = MemoryStore::new();
        store.schedule("schedule", "late", 300).await?;
        store.schedule("schedule", "early", 100).await?;
        store.schedule("schedule", "middle", 200).await?;

        let due = store.take_due("schedule", 250, 10).await?;
        assert_eq!(due, vec!["early", "middle"]);

        // Claimed members are gone.
        assert!(store.take_due("schedule", 250, 10).await?.is_empty());
        assert!(store.unschedule("schedule", "late").await?);
        assert!(!store.unschedule("schedule", "late").await?);
        Ok(())
    }
}
