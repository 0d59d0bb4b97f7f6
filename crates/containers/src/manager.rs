use std::collections::HashSet;
use std::sync::Arc;

use nexus_common::TaskResult;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::engine::ContainerEngine;
use crate::{default_catalogue, ContainerError, ContainerInfo, ContainerState, ContainerToolSpec};

/// Operations over the tool catalogue and arbitrary named containers.
///
/// Every operation reports through a [`TaskResult`]; engine failures become
/// `succeeded: false` with the engine's error text and are never retried.
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    catalogue: Vec<ContainerToolSpec>,
    protected: HashSet<String>,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::with_catalogue(engine, default_catalogue())
    }

    pub fn with_catalogue(engine: Arc<dyn ContainerEngine>, catalogue: Vec<ContainerToolSpec>) -> Self {
        let protected = catalogue
            .iter()
            .filter(|spec| spec.protected)
            .map(|spec| spec.name.clone())
            .collect();
        Self {
            engine,
            catalogue,
            protected,
        }
    }

    pub fn catalogue(&self) -> &[ContainerToolSpec] {
        &self.catalogue
    }

    pub fn is_protected(&self, container: &ContainerInfo) -> bool {
        container
            .names
            .iter()
            .any(|name| self.protected.contains(name.trim_start_matches('/')))
    }

    pub async fn list(&self) -> TaskResult {
        match self.engine.list().await {
            Ok(containers) => {
                let running = containers
                    .iter()
                    .filter(|c| c.state == ContainerState::Running)
                    .count();
                TaskResult::ok_with(
                    format!("{} containers ({} running)", containers.len(), running),
                    json!({ "containers": containers }),
                )
            }
            Err(err) => failure(err),
        }
    }

    /// Start a catalogue tool, creating its container on first use.
    pub async fn start_tool(&self, tool_key: &str) -> TaskResult {
        let key = tool_key.trim().to_ascii_lowercase();
        let Some(spec) = self.catalogue.iter().find(|spec| spec.key == key) else {
            return failure(ContainerError::UnknownTool(tool_key.to_string()));
        };

        let existing = match self.find(&spec.name).await {
            Ok(found) => found,
            Err(err) => return failure(err),
        };

        let (id, created) = match existing {
            Some(container) if container.state == ContainerState::Running => {
                debug!(tool = %spec.key, "Tool container already running");
                return TaskResult::ok_with(
                    format!("{} already running", spec.name),
                    json!({ "id": container.id, "created": false }),
                );
            }
            Some(container) => (container.id, false),
            None => match self.engine.create(spec).await {
                Ok(id) => {
                    info!(tool = %spec.key, name = %spec.name, "Created tool container");
                    (id, true)
                }
                Err(err) => return failure(err),
            },
        };

        match self.engine.start(&id).await {
            Ok(()) => TaskResult::ok_with(
                format!("{} started", spec.name),
                json!({ "id": id, "created": created }),
            ),
            Err(err) => failure(err),
        }
    }

    pub async fn start_container(&self, name: &str) -> TaskResult {
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        if container.state == ContainerState::Running {
            return TaskResult::ok(format!("{} already running", container.display_name()));
        }
        match self.engine.start(&container.id).await {
            Ok(()) => TaskResult::ok(format!("{} started", container.display_name())),
            Err(err) => failure(err),
        }
    }

    pub async fn stop_container(&self, name: &str) -> TaskResult {
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        if container.state.is_idle() {
            return TaskResult::ok(format!("{} already stopped", container.display_name()));
        }
        match self.engine.stop(&container.id).await {
            Ok(()) => TaskResult::ok(format!("{} stopped", container.display_name())),
            Err(err) => failure(err),
        }
    }

    pub async fn restart_container(&self, name: &str) -> TaskResult {
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        match self.engine.restart(&container.id).await {
            Ok(()) => TaskResult::ok(format!("{} restarted", container.display_name())),
            Err(err) => failure(err),
        }
    }

    pub async fn inspect_container(&self, name: &str) -> TaskResult {
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        match self.engine.inspect(&container.id).await {
            Ok(details) => TaskResult::ok_with(
                format!("{} is {}", container.display_name(), container.status),
                details,
            ),
            Err(err) => failure(err),
        }
    }

    pub async fn container_logs(&self, name: &str, tail_lines: usize) -> TaskResult {
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        match self.engine.logs(&container.id, tail_lines).await {
            Ok(logs) => TaskResult::ok_with(
                format!("last {} log lines of {}", tail_lines, container.display_name()),
                json!({ "logs": logs }),
            ),
            Err(err) => failure(err),
        }
    }

    /// Run a shell command inside the container. Not subject to the host
    /// command gate.
    pub async fn exec(&self, name: &str, command: &str) -> TaskResult {
        if command.trim().is_empty() {
            return TaskResult::failed("exec requires a command");
        }
        let container = match self.resolve(name).await {
            Ok(container) => container,
            Err(result) => return result,
        };
        let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        match self.engine.exec(&container.id, &argv).await {
            Ok(output) => {
                let payload = json!({ "exitCode": output.exit_code, "output": output.output });
                if output.exit_code.unwrap_or(0) == 0 {
                    TaskResult::ok_with(format!("exec in {} finished", container.display_name()), payload)
                } else {
                    TaskResult::failed_with(
                        format!(
                            "exec in {} exited with {}",
                            container.display_name(),
                            output.exit_code.unwrap_or(-1)
                        ),
                        payload,
                    )
                }
            }
            Err(err) => failure(err),
        }
    }

    /// Remove idle (exited or dead) containers that are not protected.
    pub async fn cleanup(&self) -> TaskResult {
        let containers = match self.engine.list().await {
            Ok(containers) => containers,
            Err(err) => return failure(err),
        };

        let mut removed = Vec::new();
        let mut skipped_protected = Vec::new();
        for container in containers.iter().filter(|c| c.state.is_idle()) {
            if self.is_protected(container) {
                skipped_protected.push(container.display_name());
                continue;
            }
            if let Err(err) = self.engine.remove(&container.id).await {
                warn!(name = %container.display_name(), error = %err, "Cleanup failed");
                return failure(err);
            }
            removed.push(container.display_name());
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "Removed idle containers");
        }
        TaskResult::ok_with(
            format!("removed {} idle containers", removed.len()),
            json!({ "removed": removed, "skippedProtected": skipped_protected }),
        )
    }

    async fn find(&self, name: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        let containers = self.engine.list().await?;
        Ok(containers.into_iter().find(|c| c.answers_to(name)))
    }

    async fn resolve(&self, name: &str) -> Result<ContainerInfo, TaskResult> {
        match self.find(name).await {
            Ok(Some(container)) => Ok(container),
            Ok(None) => Err(failure(ContainerError::NotFound(name.trim().to_string()))),
            Err(err) => Err(failure(err)),
        }
    }
}

fn failure(err: ContainerError) -> TaskResult {
    TaskResult::failed(err.to_string())
}
