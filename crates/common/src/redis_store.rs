use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::store::QueueStore;

/// Redis-backed queue store shared by the daemon and every producer.
///
/// Lists use LPUSH/RPOP so the oldest entry pops first; rolling lists are
/// LPUSH + LTRIM; the schedule is a sorted set claimed with ZREM.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url.to_string())
            .with_context(|| format!("failed to open redis client for {redis_url}"))?;
        let manager = client
            .get_connection_manager()
            .await
            .with_context(|| format!("failed to connect to redis at {redis_url}"))?;
        Ok(Self { manager })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(&self, list: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(list, value)
            .await
            .with_context(|| format!("failed to push onto {list}"))
    }

    async fn dequeue(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.rpop::<_, Option<String>>(list, None)
            .await
            .with_context(|| format!("failed to pop from {list}"))
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        conn.llen::<_, usize>(list)
            .await
            .with_context(|| format!("failed to read length of {list}"))
    }

    async fn push_capped(&self, list: &str, value: String, keep: usize) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(list, value)
            .await
            .with_context(|| format!("failed to push onto {list}"))?;
        let stop = keep.max(1) as isize - 1;
        conn.ltrim::<_, ()>(list, 0, stop)
            .await
            .with_context(|| format!("failed to trim {list}"))
    }

    async fn recent(&self, list: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        conn.lrange::<_, Vec<String>>(list, 0, limit as isize - 1)
            .await
            .with_context(|| format!("failed to read {list}"))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .with_context(|| format!("failed to write {key}"))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .with_context(|| format!("failed to write {key}"))
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to claim {key}"))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .with_context(|| format!("failed to read {key}"))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .with_context(|| format!("failed to delete {key}"))?;
        Ok(removed > 0)
    }

    async fn schedule(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(set, member, score)
            .await
            .with_context(|| format!("failed to schedule {member}"))
    }

    async fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let candidates: Vec<String> = conn
            .zrangebyscore_limit(set, "-inf", max_score, 0, limit as isize)
            .await
            .with_context(|| format!("failed to read due members of {set}"))?;

        // ZREM is the claim: only the caller that removes a member owns it.
        let mut claimed = Vec::with_capacity(candidates.len());
        for member in candidates {
            let removed: i64 = conn
                .zrem(set, &member)
                .await
                .with_context(|| format!("failed to claim {member}"))?;
            if removed > 0 {
                claimed.push(member);
            }
        }
        Ok(claimed)
    }

    async fn unschedule(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .zrem(set, member)
            .await
            .with_context(|| format!("failed to unschedule {member}"))?;
        Ok(removed > 0)
    }
}
