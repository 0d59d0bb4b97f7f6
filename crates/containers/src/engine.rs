use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{ContainerError, ContainerInfo, ContainerToolSpec};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineExecOutput {
    pub exit_code: Option<i64>,
    pub output: String,
}

/// Container engine operations. All ids may be a container id or name.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Every container the engine knows about, running or not.
    async fn list(&self) -> Result<Vec<ContainerInfo>, ContainerError>;

    /// Create a container from a tool spec. Returns the new container id.
    async fn create(&self, spec: &ContainerToolSpec) -> Result<String, ContainerError>;

    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    async fn restart(&self, id: &str) -> Result<(), ContainerError>;

    /// Force-remove, stopping first if needed.
    async fn remove(&self, id: &str) -> Result<(), ContainerError>;

    async fn inspect(&self, id: &str) -> Result<Value, ContainerError>;

    async fn logs(&self, id: &str, tail_lines: usize) -> Result<String, ContainerError>;

    /// Run `command` inside the container's namespaces.
    async fn exec(&self, id: &str, command: &[String]) -> Result<EngineExecOutput, ContainerError>;
}
