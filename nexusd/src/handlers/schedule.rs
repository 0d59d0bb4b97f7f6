use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nexus_common::{now_ms, Intent, ScheduledJob, Scheduler, TaskResult, MAX_SCHEDULE_SECS};
use nexus_router::Handler;
use serde_json::{json, Value};
use tracing::info;

/// Creates durable one-shot or recurring jobs.
pub struct ScheduleHandler {
    scheduler: Scheduler,
}

impl ScheduleHandler {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

// `dueAt` may be epoch milliseconds or an RFC 3339 timestamp.
fn due_at_param(intent: &Intent) -> Option<i64> {
    match intent.parameters.get("dueAt")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            })
        }
        _ => None,
    }
}

fn iso(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

#[async_trait]
impl Handler for ScheduleHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let Some(message) = intent.param_str("message") else {
            return Ok(TaskResult::failed("schedule requires a 'message' parameter"));
        };

        for key in ["delaySecs", "everySecs"] {
            if !intent.parameters.contains_key(key) {
                continue;
            }
            match intent.param_u64(key) {
                Some(secs) if secs <= MAX_SCHEDULE_SECS => {}
                _ => {
                    return Ok(TaskResult::failed(format!(
                        "'{key}' must be a whole number of seconds up to {MAX_SCHEDULE_SECS}"
                    )));
                }
            }
        }

        let mut job = if let Some(due_at) = due_at_param(&intent) {
            ScheduledJob::at(message, due_at)
        } else if let Some(delay) = intent.param_u64("delaySecs") {
            ScheduledJob::after(message, Duration::from_secs(delay))
        } else {
            return Ok(TaskResult::failed(
                "schedule requires 'delaySecs' or 'dueAt'",
            ));
        };

        if let Some(every) = intent.param_u64("everySecs").filter(|secs| *secs > 0) {
            job = job.every(Duration::from_secs(every));
        }
        if let (Some(kind), Some(action)) = (intent.param_str("intentKind"), intent.param_str("intentAction")) {
            job = job.with_intent(kind, action);
        }
        if let Some(Value::Object(params)) = intent.parameters.get("jobParameters") {
            job = job.with_parameters(params.clone());
        }

        self.scheduler.schedule(&job).await?;
        info!(job_id = %job.id, due_at_ms = job.due_at_ms, every_secs = ?job.every_secs, "Job scheduled");

        let when = iso(job.due_at_ms);
        let message = match job.every_secs {
            Some(every) => format!("scheduled job {} for {} (every {}s)", job.id, when, every),
            None => format!("scheduled job {} for {}", job.id, when),
        };
        let overdue = job.due_at_ms <= now_ms();
        Ok(TaskResult::ok_with(
            message,
            json!({
                "jobId": job.id,
                "dueAt": job.due_at_ms,
                "dueAtIso": when,
                "everySecs": job.every_secs,
                "overdue": overdue,
            }),
        ))
    }
}

pub struct CancelJobHandler {
    scheduler: Scheduler,
}

impl CancelJobHandler {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Handler for CancelJobHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let Some(job_id) = intent.param_str("jobId") else {
            return Ok(TaskResult::failed("cancel_job requires a 'jobId' parameter"));
        };
        if self.scheduler.cancel(job_id).await? {
            info!(%job_id, "Job cancelled");
            Ok(TaskResult::ok_with(
                format!("cancelled job {job_id}"),
                json!({ "jobId": job_id }),
            ))
        } else {
            Ok(TaskResult::failed(format!("no scheduled job '{job_id}'")))
        }
    }
}

/// Delivers a reminder created by the `remind` rule when its job fires.
pub struct RemindHandler;

#[async_trait]
impl Handler for RemindHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let text = intent.raw.trim();
        Ok(TaskResult::ok_with(
            format!("Reminder: {text}"),
            json!({ "reminder": text }),
        ))
    }
}
