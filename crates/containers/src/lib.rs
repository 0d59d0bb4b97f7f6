//! Lifecycle management for a small catalogue of sandboxed tool containers
//! plus arbitrary user-named containers.

pub mod docker;
pub mod engine;
pub mod manager;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use docker::DockerEngine;
pub use engine::{ContainerEngine, EngineExecOutput};
pub use manager::ContainerManager;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container '{0}' not found")]
    NotFound(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("container engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Removing,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn from_engine(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            "removing" => ContainerState::Removing,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    /// Eligible for idle cleanup.
    pub fn is_idle(&self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Dead)
    }
}

/// One container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Engine names, usually with a leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub state: ContainerState,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

impl ContainerInfo {
    /// Exact name match, allowing the engine's leading `/`.
    pub fn answers_to(&self, name: &str) -> bool {
        let wanted = name.trim().trim_start_matches('/');
        !wanted.is_empty()
            && self
                .names
                .iter()
                .any(|n| n == wanted || n.strip_prefix('/') == Some(wanted))
    }

    pub fn display_name(&self) -> String {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| self.id.chars().take(12).collect())
    }
}

fn default_protected() -> bool {
    true
}

/// Static descriptor for a sandbox tool container that can be started on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerToolSpec {
    pub key: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub pids_limit: Option<i64>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default = "default_protected")]
    pub protected: bool,
}

impl ContainerToolSpec {
    pub fn new(key: &str, name: &str, image: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            memory_mb: None,
            cpus: None,
            pids_limit: None,
            env: Vec::new(),
            cmd: Vec::new(),
            protected: true,
        }
    }

    pub fn limits(mut self, memory_mb: u64, cpus: f64, pids_limit: i64) -> Self {
        self.memory_mb = Some(memory_mb);
        self.cpus = Some(cpus);
        self.pids_limit = Some(pids_limit);
        self
    }

    pub fn command(mut self, cmd: &[&str]) -> Self {
        self.cmd = cmd.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Built-in sandbox catalogue. Every entry is protected from idle cleanup.
pub fn default_catalogue() -> Vec<ContainerToolSpec> {
    vec![
        ContainerToolSpec::new("firecrawl", "nexus-firecrawl", "mendableai/firecrawl:latest")
            .limits(2048, 2.0, 512),
        ContainerToolSpec::new("searxng", "nexus-searxng", "searxng/searxng:latest")
            .limits(512, 1.0, 256),
        ContainerToolSpec::new("browser", "nexus-browser", "browserless/chrome:latest")
            .limits(2048, 2.0, 1024),
        ContainerToolSpec::new("sandbox", "nexus-sandbox", "python:3.12-slim")
            .limits(1024, 1.0, 256)
            .command(&["sleep", "infinity"]),
    ]
}
