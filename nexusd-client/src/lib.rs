//! Nexus Client Library
//!
//! Producer side of the inbox contract: push requests, poll for answers,
//! and manage scheduled jobs against the same store the daemon drains.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nexus_common::keys::{answer_key, result_key, INBOX_KEY, LOGS_KEY, STATS_KEY};
use nexus_common::{
    InboxEntry, Origin, Parameters, QueueStore, RedisStore, ScheduledJob, Scheduler, TaskResult,
};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("stored answer for {key} is not a task result: {reason}")]
    InvalidResponse { key: String, reason: String },
    #[error("job message must not be empty")]
    EmptyJob,
}

/// Handle on the shared store for submitting work to the daemon.
#[derive(Clone)]
pub struct NexusClient {
    store: Arc<dyn QueueStore>,
    scheduler: Scheduler,
}

impl NexusClient {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        let scheduler = Scheduler::new(store.clone());
        Self { store, scheduler }
    }

    /// Connect to the Redis store the daemon drains.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let store = RedisStore::connect(redis_url)
            .await
            .with_context(|| format!("connect to store at {redis_url}"))?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Push a request that expects an answer. Returns its request id.
    pub async fn submit(
        &self,
        message: &str,
        origin: Origin,
        parameters: Option<Parameters>,
    ) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let mut entry = InboxEntry::new(message, origin).with_request_id(request_id.clone());
        entry.parameters = parameters;
        self.push(&entry).await?;
        debug!(%request_id, "Request submitted");
        Ok(request_id)
    }

    /// Push a request nobody will wait for; no answer is written.
    pub async fn fire_and_forget(
        &self,
        message: &str,
        origin: Origin,
        parameters: Option<Parameters>,
    ) -> Result<()> {
        let mut entry = InboxEntry::new(message, origin);
        entry.parameters = parameters;
        self.push(&entry).await
    }

    /// Push a fully formed entry, e.g. one carrying an intent hint.
    pub async fn push(&self, entry: &InboxEntry) -> Result<()> {
        let encoded = serde_json::to_string(entry)?;
        self.store.enqueue(INBOX_KEY, encoded).await
    }

    /// Read `answer:{request_id}` once.
    pub async fn answer(&self, request_id: &str) -> Result<Option<TaskResult>> {
        self.read_result(&answer_key(request_id)).await
    }

    /// Poll for an answer until it appears or `timeout` elapses.
    ///
    /// `None` means the outcome is unknown: the request may still be
    /// queued, may still be running, or its answer may have expired.
    pub async fn wait_answer(
        &self,
        request_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<TaskResult>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.answer(request_id).await? {
                return Ok(Some(result));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(%request_id, "No answer before timeout");
                return Ok(None);
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Submit and wait in one call.
    pub async fn ask(
        &self,
        message: &str,
        origin: Origin,
        timeout: Duration,
    ) -> Result<Option<TaskResult>> {
        let request_id = self.submit(message, origin, None).await?;
        self.wait_answer(&request_id, timeout, DEFAULT_POLL_INTERVAL)
            .await
    }

    /// Persist a job. Returns its id.
    pub async fn schedule(&self, job: &ScheduledJob) -> Result<String> {
        if job.message.trim().is_empty() {
            return Err(ClientError::EmptyJob.into());
        }
        self.scheduler.schedule(job).await?;
        Ok(job.id.clone())
    }

    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        self.scheduler.cancel(job_id).await
    }

    pub async fn pending_job(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        self.scheduler.get(job_id).await
    }

    /// Read the latest `result:{job_id}`.
    pub async fn job_result(&self, job_id: &str) -> Result<Option<TaskResult>> {
        self.read_result(&result_key(job_id)).await
    }

    /// Last persisted daemon statistics.
    pub async fn stats(&self) -> Result<Option<Value>> {
        match self.store.get(STATS_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Most recent daemon log lines, newest first. Undecodable lines are skipped.
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<Value>> {
        let raw = self.store.recent(LOGS_KEY, limit).await?;
        Ok(raw
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    async fn read_result(&self, key: &str) -> Result<Option<TaskResult>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let result = serde_json::from_str(&raw).map_err(|err| ClientError::InvalidResponse {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Some(result))
    }
}
