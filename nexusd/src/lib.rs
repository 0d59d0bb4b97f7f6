//! Nexus agent daemon.
//!
//! Drains the shared `inbox`, classifies each entry into an intent, routes
//! it to a capability handler and publishes the outcome under
//! `answer:{requestId}` and/or `result:{jobId}`.

pub mod config;
pub mod daemon;
pub mod handlers;
pub mod log_mirror;
pub mod stats;

pub use config::{load_config, resolve_config_path, DaemonConfig, DaemonSettings};
pub use daemon::{CycleOutcome, Daemon, DaemonBuilder, DaemonState};
pub use log_mirror::{LogLine, LogMirror};
pub use stats::DaemonStats;
