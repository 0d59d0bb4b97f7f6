//! In-memory [`ContainerEngine`] for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::engine::{ContainerEngine, EngineExecOutput};
use crate::{ContainerError, ContainerInfo, ContainerState, ContainerToolSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    List,
    Create(String),
    Start(String),
    Stop(String),
    Restart(String),
    Remove(String),
    Inspect(String),
    Logs(String, usize),
    Exec(String, Vec<String>),
}

#[derive(Default)]
struct FakeState {
    containers: Vec<ContainerInfo>,
    calls: Vec<EngineCall>,
    fail_next: Option<String>,
    next_id: u64,
}

/// Records every call and keeps container state in memory.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, name: &str, state: ContainerState) {
        let mut guard = self.state.lock().await;
        guard.next_id += 1;
        let id = format!("{:012x}", guard.next_id);
        guard.containers.push(ContainerInfo {
            id,
            names: vec![format!("/{name}")],
            image: "fake:latest".into(),
            state,
            status: format!("{state:?}"),
            created: None,
        });
    }

    /// Make the next engine call fail with an engine error.
    pub async fn fail_next(&self, message: &str) {
        self.state.lock().await.fail_next = Some(message.to_string());
    }

    pub async fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn state_of(&self, name: &str) -> Option<ContainerState> {
        let guard = self.state.lock().await;
        guard
            .containers
            .iter()
            .find(|c| c.answers_to(name))
            .map(|c| c.state)
    }

    async fn record(&self, call: EngineCall) -> Result<tokio::sync::MutexGuard<'_, FakeState>, ContainerError> {
        let mut guard = self.state.lock().await;
        guard.calls.push(call);
        if let Some(message) = guard.fail_next.take() {
            return Err(ContainerError::Engine(message));
        }
        Ok(guard)
    }
}

fn find<'a>(state: &'a mut FakeState, id: &str) -> Result<&'a mut ContainerInfo, ContainerError> {
    state
        .containers
        .iter_mut()
        .find(|c| c.id == id || c.answers_to(id))
        .ok_or_else(|| ContainerError::NotFound(id.to_string()))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list(&self) -> Result<Vec<ContainerInfo>, ContainerError> {
        let guard = self.record(EngineCall::List).await?;
        Ok(guard.containers.clone())
    }

    async fn create(&self, spec: &ContainerToolSpec) -> Result<String, ContainerError> {
        let mut guard = self.record(EngineCall::Create(spec.name.clone())).await?;
        guard.next_id += 1;
        let id = format!("{:012x}", guard.next_id);
        guard.containers.push(ContainerInfo {
            id: id.clone(),
            names: vec![format!("/{}", spec.name)],
            image: spec.image.clone(),
            state: ContainerState::Created,
            status: "Created".into(),
            created: None,
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        let mut guard = self.record(EngineCall::Start(id.to_string())).await?;
        find(&mut guard, id)?.state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let mut guard = self.record(EngineCall::Stop(id.to_string())).await?;
        find(&mut guard, id)?.state = ContainerState::Exited;
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), ContainerError> {
        let mut guard = self.record(EngineCall::Restart(id.to_string())).await?;
        find(&mut guard, id)?.state = ContainerState::Running;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        let mut guard = self.record(EngineCall::Remove(id.to_string())).await?;
        let before = guard.containers.len();
        guard.containers.retain(|c| !(c.id == id || c.answers_to(id)));
        if guard.containers.len() == before {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<Value, ContainerError> {
        let mut guard = self.record(EngineCall::Inspect(id.to_string())).await?;
        let info = find(&mut guard, id)?;
        Ok(json!({ "Id": info.id, "Name": info.names.first(), "State": { "Status": info.state } }))
    }

    async fn logs(&self, id: &str, tail_lines: usize) -> Result<String, ContainerError> {
        let mut guard = self.record(EngineCall::Logs(id.to_string(), tail_lines)).await?;
        let info = find(&mut guard, id)?;
        Ok(format!("log line from {}\n", info.display_name()))
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<EngineExecOutput, ContainerError> {
        let mut guard = self
            .record(EngineCall::Exec(id.to_string(), command.to_vec()))
            .await?;
        let info = find(&mut guard, id)?;
        if info.state != ContainerState::Running {
            return Err(ContainerError::Engine(format!(
                "container {} is not running",
                info.display_name()
            )));
        }
        Ok(EngineExecOutput {
            exit_code: Some(0),
            output: command.join(" "),
        })
    }
}
