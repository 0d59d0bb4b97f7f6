use std::collections::HashMap;

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    RestartContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{ContainerEngine, EngineExecOutput};
use crate::{ContainerError, ContainerInfo, ContainerState, ContainerToolSpec};

const STOP_GRACE_SECS: i32 = 10;
const MANAGED_LABEL: &str = "nexus.managed";
const TOOL_LABEL: &str = "nexus.tool";

/// [`ContainerEngine`] backed by the local Docker (or Podman) API socket.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults().map_err(engine_error)?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        let (from_image, tag) = split_image_tag(image);
        info!(image, "Pulling container image");
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(engine_error)?;
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list(&self) -> Result<Vec<ContainerInfo>, ContainerError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptionsBuilder::new().all(true).build()))
            .await
            .map_err(engine_error)?;

        Ok(summaries
            .into_iter()
            .map(|summary| ContainerInfo {
                id: summary.id.unwrap_or_default(),
                names: summary.names.unwrap_or_default(),
                image: summary.image.unwrap_or_default(),
                state: summary
                    .state
                    .map(|state| ContainerState::from_engine(&state.to_string()))
                    .unwrap_or(ContainerState::Unknown),
                status: summary.status.unwrap_or_default(),
                created: summary.created,
            })
            .collect())
    }

    async fn create(&self, spec: &ContainerToolSpec) -> Result<String, ContainerError> {
        self.ensure_image(&spec.image).await?;

        let host_config = HostConfig {
            memory: spec.memory_mb.map(|mb| (mb * 1024 * 1024) as i64),
            nano_cpus: spec.cpus.map(|cpus| (cpus * 1_000_000_000.0) as i64),
            pids_limit: spec.pids_limit,
            ..Default::default()
        };
        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (TOOL_LABEL.to_string(), spec.key.clone()),
        ]);
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(engine_error)?;
        debug!(name = %spec.name, id = %created.id, "Created tool container");
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|err| map_error(id, err))
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build()),
            )
            .await
            .map_err(|err| map_error(id, err))
    }

    async fn restart(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build()),
            )
            .await
            .map_err(|err| map_error(id, err))
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(true).build()),
            )
            .await
            .map_err(|err| map_error(id, err))
    }

    async fn inspect(&self, id: &str) -> Result<Value, ContainerError> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| map_error(id, err))?;
        serde_json::to_value(details).map_err(|err| ContainerError::Engine(err.to_string()))
    }

    async fn logs(&self, id: &str, tail_lines: usize) -> Result<String, ContainerError> {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail(&tail_lines.to_string())
            .build();
        let chunks: Vec<_> = self
            .docker
            .logs(id, Some(options))
            .try_collect()
            .await
            .map_err(|err| map_error(id, err))?;
        Ok(chunks.iter().map(|chunk| chunk.to_string()).collect())
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<EngineExecOutput, ContainerError> {
        let config = ExecConfig {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, config)
            .await
            .map_err(|err| map_error(id, err))?;

        let mut output = String::new();
        match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(engine_error)?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    output.push_str(&chunk.map_err(engine_error)?.to_string());
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self.docker.inspect_exec(&exec.id).await.map_err(engine_error)?;
        Ok(EngineExecOutput {
            exit_code: inspected.exit_code,
            output,
        })
    }
}

fn split_image_tag(image: &str) -> (&str, &str) {
    // A colon before the last slash belongs to a registry port, not a tag.
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

fn is_not_found_error(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404
    )
}

fn map_error(id: &str, error: BollardError) -> ContainerError {
    if is_not_found_error(&error) {
        ContainerError::NotFound(id.to_string())
    } else {
        engine_error(error)
    }
}

fn engine_error(error: BollardError) -> ContainerError {
    ContainerError::Engine(error.to_string())
}
