//! The control loop.
//!
//! One cycle fires due scheduled jobs, pops at most one inbox entry,
//! classifies and routes it, and writes the serialized [`TaskResult`] to
//! `answer:{requestId}` and/or `result:{jobId}`. Faults are logged and
//! counted; nothing that happens inside a cycle stops the loop.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::FutureExt;
use nexus_brain::Brain;
use nexus_common::keys::{answer_key, result_key, INBOX_KEY, INSTANCE_KEY, STATS_KEY};
use nexus_common::{now_ms, InboxEntry, QueueStore, Scheduler, TaskResult};
use nexus_containers::ContainerManager;
use nexus_gate::CommandGate;
use nexus_router::{ClassificationRule, Handler, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DaemonSettings;
use crate::handlers::{register_builtin, HandlerContext, StatusProbe};
use crate::log_mirror::LogMirror;
use crate::stats::DaemonStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// What a single [`Daemon::cycle`] did with the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Processed { succeeded: bool },
    Faulted,
}

pub struct Daemon {
    instance_id: String,
    settings: DaemonSettings,
    store: Arc<dyn QueueStore>,
    router: Router,
    scheduler: Scheduler,
    containers: Option<Arc<ContainerManager>>,
    mirror: LogMirror,
    stats: Arc<Mutex<DaemonStats>>,
    state: watch::Sender<DaemonState>,
    cycles: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub struct DaemonBuilder {
    store: Arc<dyn QueueStore>,
    brain: Arc<Brain>,
    settings: DaemonSettings,
    gate: Option<CommandGate>,
    containers: Option<Arc<ContainerManager>>,
    rules: Option<Vec<ClassificationRule>>,
    configured_limits: (Option<u64>, Option<u64>),
    handlers: Vec<(String, Arc<dyn Handler>)>,
    instance_id: Option<String>,
}

impl DaemonBuilder {
    pub fn settings(mut self, settings: DaemonSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn gate(mut self, gate: CommandGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn containers(mut self, manager: Arc<ContainerManager>) -> Self {
        self.containers = Some(manager);
        self
    }

    pub fn rules(mut self, rules: Vec<ClassificationRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Gate limits from the config file: (timeout ms, max output bytes).
    pub fn configured_limits(mut self, limits: (Option<u64>, Option<u64>)) -> Self {
        self.configured_limits = limits;
        self
    }

    /// Extra handler, registered after the built-ins so it can replace one.
    pub fn handler<H>(mut self, action: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.handlers.push((action.into(), Arc::new(handler)));
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> Arc<Daemon> {
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (state_tx, state_rx) = watch::channel(DaemonState::Stopped);
        let stats = Arc::new(Mutex::new(DaemonStats::new(instance_id.clone())));
        let scheduler = Scheduler::new(self.store.clone());
        let mirror = LogMirror::new(self.store.clone(), self.settings.logs_cap);
        let gate = Arc::new(self.gate.unwrap_or_else(|| CommandGate::new(".")));

        let mut router = match self.rules {
            Some(rules) => Router::with_rules(self.brain.clone(), rules),
            None => Router::new(self.brain.clone()),
        };
        let ctx = HandlerContext {
            store: self.store.clone(),
            gate,
            containers: self.containers.clone(),
            scheduler: scheduler.clone(),
            brain: self.brain.clone(),
            mirror: mirror.clone(),
            status: StatusProbe::new(state_rx, stats.clone()),
            configured_limits: self.configured_limits,
        };
        register_builtin(&mut router, &ctx);
        for (action, handler) in self.handlers {
            router.register_shared(action, handler);
        }

        Arc::new(Daemon {
            instance_id,
            settings: self.settings,
            store: self.store,
            router,
            scheduler,
            containers: self.containers,
            mirror,
            stats,
            state: state_tx,
            cycles: AtomicU64::new(0),
            worker: Mutex::new(None),
        })
    }
}

impl Daemon {
    pub fn builder(store: Arc<dyn QueueStore>, brain: Arc<Brain>) -> DaemonBuilder {
        DaemonBuilder {
            store,
            brain,
            settings: DaemonSettings::default(),
            gate: None,
            containers: None,
            rules: None,
            configured_limits: (None, None),
            handlers: Vec::new(),
            instance_id: None,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> DaemonStats {
        self.stats.lock().await.snapshot(now_ms())
    }

    /// Start the loop on a background task. Returns `false` when the
    /// daemon was not stopped, in which case nothing happens.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == DaemonState::Stopped {
                *state = DaemonState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!(state = %self.state(), "Start ignored; daemon is not stopped");
            return Ok(false);
        }

        if let Err(err) = self.claim_instance().await {
            self.state.send_replace(DaemonState::Stopped);
            return Err(err);
        }

        self.stats.lock().await.started_at_ms = now_ms();
        info!(
            instance = %self.instance_id,
            interval_ms = self.settings.interval_ms,
            actions = ?self.router.registry().actions(),
            "Daemon started"
        );
        self.mirror
            .info(format!("daemon {} started", self.instance_id))
            .await;

        let daemon = Arc::clone(self);
        let handle = tokio::spawn(async move { daemon.run_until_stopped().await });
        *self.worker.lock().await = Some(handle);
        Ok(true)
    }

    /// Request a graceful stop. The cycle in flight completes first.
    pub fn stop(&self) -> bool {
        let requested = self.state.send_if_modified(|state| {
            if *state == DaemonState::Running {
                *state = DaemonState::Stopping;
                true
            } else {
                false
            }
        });
        if requested {
            info!("Daemon stop requested");
        }
        requested
    }

    /// Wait for the loop task started by [`Daemon::start`] to finish.
    pub async fn join(&self) -> Result<()> {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            handle.await.context("daemon loop task failed")?;
        }
        Ok(())
    }

    /// Start, then wait until a stop request has been honoured.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if !self.start().await? {
            bail!("daemon is already {}", self.state());
        }
        self.join().await
    }

    async fn run_until_stopped(&self) {
        let mut ticker = tokio::time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state_rx = self.state.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *state_rx.borrow_and_update() != DaemonState::Running {
                break;
            }
            if AssertUnwindSafe(self.cycle()).catch_unwind().await.is_err() {
                error!("Cycle panicked; continuing");
                self.stats.lock().await.faults += 1;
            }
        }

        self.persist_stats().await;
        self.release_instance().await;
        self.mirror
            .info(format!("daemon {} stopped", self.instance_id))
            .await;
        self.state.send_replace(DaemonState::Stopped);
        info!(cycles = self.cycle_count(), "Daemon stopped");
    }

    /// Run one cycle. Never fails; faults are logged and counted.
    pub async fn cycle(&self) -> CycleOutcome {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        self.fire_due_jobs().await;

        let outcome = match self.store.dequeue(INBOX_KEY).await {
            Ok(None) => CycleOutcome::Idle,
            Ok(Some(raw)) => self.process(&raw).await,
            Err(err) => {
                warn!(error = %err, "Inbox pop failed");
                CycleOutcome::Faulted
            }
        };

        {
            let mut stats = self.stats.lock().await;
            stats.cycles = cycle;
            match outcome {
                CycleOutcome::Idle => stats.idle_cycles += 1,
                CycleOutcome::Faulted => stats.faults += 1,
                CycleOutcome::Processed { .. } => {}
            }
        }

        if AssertUnwindSafe(self.periodic(cycle)).catch_unwind().await.is_err() {
            error!(cycle, "Periodic task panicked");
            self.stats.lock().await.faults += 1;
        }
        outcome
    }

    async fn process(&self, raw: &str) -> CycleOutcome {
        let entry: InboxEntry = match serde_json::from_str(raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "Malformed inbox entry dropped");
                self.mirror
                    .warn(format!("malformed inbox entry dropped: {err}"))
                    .await;
                return CycleOutcome::Faulted;
            }
        };

        let intent = match &entry.intent {
            Some(hint) => self.router.from_hint(hint, &entry.message, entry.origin),
            None => self.router.classify(&entry.message, entry.origin).await,
        };
        let intent = intent.merge_parameters(entry.parameters);
        let action = intent.action.clone();
        info!(
            request_id = ?entry.request_id,
            job_id = ?entry.job_id,
            origin = %entry.origin,
            %action,
            kind = %intent.kind,
            "Dispatching"
        );

        let result = match AssertUnwindSafe(self.router.route(intent))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(%action, error = %err, "Handler fault");
                self.mirror
                    .error(format!("handler '{action}' faulted: {err}"))
                    .await;
                return CycleOutcome::Faulted;
            }
            Err(_) => {
                error!(%action, "Handler panicked");
                self.mirror
                    .error(format!("handler '{action}' panicked"))
                    .await;
                return CycleOutcome::Faulted;
            }
        };

        if let Err(err) = self
            .write_result(entry.request_id.as_deref(), entry.job_id.as_deref(), &result)
            .await
        {
            error!(%action, error = %err, "Failed to store result");
            return CycleOutcome::Faulted;
        }

        self.stats
            .lock()
            .await
            .record_result(&action, result.succeeded, now_ms());
        debug!(%action, succeeded = result.succeeded, "Processed");
        CycleOutcome::Processed {
            succeeded: result.succeeded,
        }
    }

    async fn write_result(
        &self,
        request_id: Option<&str>,
        job_id: Option<&str>,
        result: &TaskResult,
    ) -> Result<()> {
        if request_id.is_none() && job_id.is_none() {
            return Ok(());
        }
        let encoded = serde_json::to_string(result).context("encode task result")?;
        if let Some(request_id) = request_id {
            self.store
                .set_with_ttl(&answer_key(request_id), encoded.clone(), self.settings.answer_ttl())
                .await?;
        }
        if let Some(job_id) = job_id {
            self.store
                .set_with_ttl(&result_key(job_id), encoded, self.settings.job_result_ttl())
                .await?;
        }
        Ok(())
    }

    async fn fire_due_jobs(&self) {
        let tick = self
            .scheduler
            .tick(now_ms(), self.settings.scheduler_batch.max(1));
        match AssertUnwindSafe(tick).catch_unwind().await {
            Ok(Ok(0)) => {}
            Ok(Ok(fired)) => {
                debug!(fired, "Scheduled jobs enqueued");
                self.stats.lock().await.jobs_fired += fired as u64;
            }
            Ok(Err(err)) => warn!(error = %err, "Scheduler tick failed"),
            Err(_) => {
                error!("Scheduler tick panicked");
                self.mirror.error("scheduler tick panicked").await;
                self.stats.lock().await.faults += 1;
            }
        }
    }

    async fn periodic(&self, cycle: u64) {
        let cleanup_every = self.settings.cleanup_every;
        if cleanup_every > 0 && cycle % cleanup_every == 0 {
            self.cleanup_containers().await;
        }
        if cycle % self.settings.lease_refresh_every() == 0 {
            self.refresh_instance().await;
        }
        let stats_every = self.settings.stats_every;
        if stats_every > 0 && cycle % stats_every == 0 {
            self.persist_stats().await;
        }
    }

    async fn cleanup_containers(&self) {
        let Some(manager) = &self.containers else {
            return;
        };
        let result = manager.cleanup().await;
        self.stats.lock().await.cleanups += 1;
        if !result.succeeded {
            warn!(message = %result.message, "Container cleanup failed");
            self.mirror
                .warn(format!("container cleanup failed: {}", result.message))
                .await;
            return;
        }
        let removed = result
            .payload
            .as_ref()
            .and_then(|payload| payload.get("removed"))
            .and_then(|removed| removed.as_array())
            .map_or(0, |removed| removed.len());
        if removed > 0 {
            info!(removed, "Idle containers removed");
            self.mirror.info(result.message).await;
        }
    }

    async fn persist_stats(&self) {
        let snapshot = self.stats.lock().await.snapshot(now_ms());
        let encoded = match serde_json::to_string(&snapshot) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "Failed to encode stats");
                return;
            }
        };
        if let Err(err) = self.store.set(STATS_KEY, encoded).await {
            warn!(error = %err, "Failed to persist stats");
        }
    }

    async fn claim_instance(&self) -> Result<()> {
        let lease = self.settings.instance_lease();
        if self
            .store
            .set_if_absent(INSTANCE_KEY, self.instance_id.clone(), lease)
            .await?
        {
            debug!(instance = %self.instance_id, "Instance lease claimed");
            return Ok(());
        }

        let holder = self.store.get(INSTANCE_KEY).await?.unwrap_or_default();
        if self.settings.refuse_if_running {
            bail!("another daemon instance ({holder}) is draining the inbox");
        }
        warn!(
            %holder,
            "Another daemon instance appears to be draining the inbox; entries will be shared"
        );
        Ok(())
    }

    async fn refresh_instance(&self) {
        let current = match self.store.get(INSTANCE_KEY).await {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "Failed to read instance lease");
                return;
            }
        };
        if current.as_deref().is_some_and(|holder| holder != self.instance_id) {
            return;
        }
        if let Err(err) = self
            .store
            .set_with_ttl(INSTANCE_KEY, self.instance_id.clone(), self.settings.instance_lease())
            .await
        {
            warn!(error = %err, "Failed to refresh instance lease");
        }
    }

    async fn release_instance(&self) {
        match self.store.get(INSTANCE_KEY).await {
            Ok(Some(holder)) if holder == self.instance_id => {
                if let Err(err) = self.store.delete(INSTANCE_KEY).await {
                    warn!(error = %err, "Failed to release instance lease");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Failed to read instance lease"),
        }
    }
}
