//! Durable job scheduling on top of the queue store.
//!
//! Jobs live in the store (`job:{id}` payload plus a `schedule` sorted-set
//! index) rather than in process timers, so they survive a daemon restart
//! and can be cancelled by id from any producer. A due job is turned into
//! an ordinary inbox entry and flows through the same classify/route path
//! as external requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::keys::{job_key, INBOX_KEY, SCHEDULE_KEY};
use crate::store::QueueStore;
use crate::types::{InboxEntry, IntentHint, Origin, Parameters};

const MIN_PERIOD_MS: i64 = 1_000;

/// Longest accepted delay or period: roughly one hundred years.
pub const MAX_SCHEDULE_SECS: u64 = 100 * 365 * 86_400;

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn scheduled_origin() -> Origin {
    Origin::ScheduledJob
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub message: String,
    #[serde(default = "scheduled_origin")]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentHint>,
    pub due_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ScheduledJob {
    /// One-shot job due at an absolute time (epoch ms).
    pub fn at(message: impl Into<String>, due_at_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message: message.into(),
            origin: Origin::ScheduledJob,
            parameters: None,
            intent: None,
            due_at_ms,
            every_secs: None,
            request_id: None,
        }
    }

    /// One-shot job due after `delay` from now. Saturates at the far future.
    pub fn after(message: impl Into<String>, delay: Duration) -> Self {
        Self::at(message, crate::now_ms().saturating_add(duration_ms(delay)))
    }

    /// Repeat every `period` after the first run.
    pub fn every(mut self, period: Duration) -> Self {
        self.every_secs = Some(period.as_secs().max(1));
        self
    }

    pub fn with_intent(mut self, kind: impl Into<String>, action: impl Into<String>) -> Self {
        self.intent = Some(IntentHint {
            kind: kind.into(),
            action: action.into(),
        });
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.every_secs.is_some()
    }

    /// The inbox entry this job produces when it fires.
    pub fn to_entry(&self) -> InboxEntry {
        InboxEntry {
            message: self.message.clone(),
            origin: self.origin,
            request_id: self.request_id.clone(),
            parameters: self.parameters.clone(),
            timestamp: crate::now_ms(),
            job_id: Some(self.id.clone()),
            intent: self.intent.clone(),
        }
    }

    /// Next due time strictly after `now_ms`, skipping missed periods.
    /// Arithmetic saturates, so huge periods push the job to the far future.
    pub fn next_due(&self, now_ms: i64) -> Option<i64> {
        let period = i64::try_from(self.every_secs?)
            .ok()
            .and_then(|secs| secs.checked_mul(1_000))
            .unwrap_or(i64::MAX)
            .max(MIN_PERIOD_MS);
        let next = self.due_at_ms.saturating_add(period);
        if next > now_ms {
            return Some(next);
        }
        let missed = now_ms.saturating_sub(self.due_at_ms) / period;
        Some(
            self.due_at_ms
                .saturating_add(missed.saturating_add(1).saturating_mul(period)),
        )
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn QueueStore>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Persist a job and index it by due time.
    pub async fn schedule(&self, job: &ScheduledJob) -> Result<()> {
        if job.message.trim().is_empty() {
            bail!("scheduled job {} has an empty message", job.id);
        }
        let payload = serde_json::to_string(job)?;
        self.store.set(&job_key(&job.id), payload).await?;
        self.store
            .schedule(SCHEDULE_KEY, &job.id, job.due_at_ms)
            .await?;
        info!(
            job_id = %job.id,
            due_at_ms = job.due_at_ms,
            recurring = job.is_recurring(),
            "Job scheduled"
        );
        Ok(())
    }

    /// Cancel a job by id. Returns whether anything was pending.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let indexed = self.store.unschedule(SCHEDULE_KEY, job_id).await?;
        let stored = self.store.delete(&job_key(job_id)).await?;
        if indexed || stored {
            info!(%job_id, "Job cancelled");
        }
        Ok(indexed || stored)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        let Some(raw) = self.store.get(&job_key(job_id)).await? else {
            return Ok(None);
        };
        let job = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode scheduled job {job_id}"))?;
        Ok(Some(job))
    }

    /// Feed every job due at `now_ms` into the inbox. Returns how many fired.
    pub async fn tick(&self, now_ms: i64, batch: usize) -> Result<usize> {
        let due = self.store.take_due(SCHEDULE_KEY, now_ms, batch).await?;
        let mut fired = 0;

        for job_id in due {
            let job = match self.get(&job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    debug!(%job_id, "Due job has no payload (cancelled)");
                    continue;
                }
                Err(err) => {
                    warn!(%job_id, error = %err, "Dropping undecodable job");
                    self.store.delete(&job_key(&job_id)).await?;
                    continue;
                }
            };

            let entry = serde_json::to_string(&job.to_entry())?;
            self.store.enqueue(INBOX_KEY, entry).await?;
            fired += 1;
            debug!(%job_id, "Job fired into inbox");

            match job.next_due(now_ms) {
                Some(next) => {
                    let mut next_job = job;
                    next_job.due_at_ms = next;
                    // A cancel that raced the claim removed the payload; keep it cancelled.
                    if self.store.get(&job_key(&job_id)).await?.is_some() {
                        self.schedule(&next_job).await?;
                    }
                }
                None => {
                    self.store.delete(&job_key(&job_id)).await?;
                }
            }
        }

        Ok(fired)
    }
}
