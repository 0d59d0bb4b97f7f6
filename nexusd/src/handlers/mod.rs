//! Built-in capability handlers.
//!
//! Each handler converts expected failures into a failed [`TaskResult`]
//! and only returns `Err` for store faults it cannot reasonably report.
//!
//! [`TaskResult`]: nexus_common::TaskResult

mod ask;
mod docker;
mod file;
mod logs;
mod schedule;
mod shell;
mod status;

use std::sync::Arc;

use nexus_brain::Brain;
use nexus_common::{QueueStore, Scheduler};
use nexus_containers::ContainerManager;
use nexus_gate::CommandGate;
use nexus_router::Router;
use tokio::sync::{watch, Mutex};

use crate::daemon::DaemonState;
use crate::log_mirror::LogMirror;
use crate::stats::DaemonStats;

pub use ask::AskHandler;
pub use docker::DockerHandler;
pub use file::FileHandler;
pub use logs::LogsHandler;
pub use schedule::{CancelJobHandler, RemindHandler, ScheduleHandler};
pub use shell::ShellHandler;
pub use status::StatusHandler;

/// Read-only view of the daemon's state and counters.
#[derive(Clone)]
pub struct StatusProbe {
    state: watch::Receiver<DaemonState>,
    stats: Arc<Mutex<DaemonStats>>,
}

impl StatusProbe {
    pub fn new(state: watch::Receiver<DaemonState>, stats: Arc<Mutex<DaemonStats>>) -> Self {
        Self { state, stats }
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub async fn stats(&self, now_ms: i64) -> DaemonStats {
        self.stats.lock().await.snapshot(now_ms)
    }
}

/// Collaborators the built-in handlers close over.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn QueueStore>,
    pub gate: Arc<CommandGate>,
    pub containers: Option<Arc<ContainerManager>>,
    pub scheduler: Scheduler,
    pub brain: Arc<Brain>,
    pub mirror: LogMirror,
    pub status: StatusProbe,
    /// Gate limits from the config file: (timeout ms, max output bytes).
    pub configured_limits: (Option<u64>, Option<u64>),
}

/// Register every built-in handler under its action key.
pub fn register_builtin(router: &mut Router, ctx: &HandlerContext) {
    router.register(
        "shell",
        ShellHandler::new(ctx.gate.clone(), ctx.configured_limits),
    );
    router.register("docker", DockerHandler::new(ctx.containers.clone()));
    router.register(
        "file",
        FileHandler::new(ctx.gate.working_dir().to_path_buf(), ctx.configured_limits),
    );
    router.register(
        "status",
        StatusHandler::new(ctx.status.clone(), ctx.store.clone()),
    );
    router.register("logs", LogsHandler::new(ctx.mirror.clone()));
    router.register("ask", AskHandler::new(ctx.brain.clone()));
    router.register("schedule", ScheduleHandler::new(ctx.scheduler.clone()));
    router.register("cancel_job", CancelJobHandler::new(ctx.scheduler.clone()));
    router.register("remind", RemindHandler);
}
