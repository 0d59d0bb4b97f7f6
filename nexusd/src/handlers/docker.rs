use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_common::{Intent, TaskResult};
use nexus_containers::ContainerManager;
use nexus_router::Handler;

const DEFAULT_TAIL: u64 = 100;
const MAX_TAIL: u64 = 5_000;

/// Dispatches the `op` parameter to the container manager.
pub struct DockerHandler {
    containers: Option<Arc<ContainerManager>>,
}

impl DockerHandler {
    pub fn new(containers: Option<Arc<ContainerManager>>) -> Self {
        Self { containers }
    }
}

#[async_trait]
impl Handler for DockerHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        let Some(manager) = &self.containers else {
            return Ok(TaskResult::failed("container engine is not available"));
        };

        let op = intent.param_str("op").unwrap_or("list").to_ascii_lowercase();
        let name = intent.param_str("name");
        let needs_name = |op: &str| TaskResult::failed(format!("docker {op} requires a 'name' parameter"));

        let result = match op.as_str() {
            "list" | "ps" => manager.list().await,
            "cleanup" | "prune" => manager.cleanup().await,
            "start_tool" => match intent.param_str("tool").or(name) {
                Some(tool) => manager.start_tool(tool).await,
                None => TaskResult::failed("docker start_tool requires a 'tool' parameter"),
            },
            "start" | "stop" | "restart" | "inspect" | "logs" | "exec" => {
                let Some(name) = name else {
                    return Ok(needs_name(&op));
                };
                match op.as_str() {
                    "start" => manager.start_container(name).await,
                    "stop" => manager.stop_container(name).await,
                    "restart" => manager.restart_container(name).await,
                    "inspect" => manager.inspect_container(name).await,
                    "logs" => {
                        let tail = intent.param_u64("tail").unwrap_or(DEFAULT_TAIL).clamp(1, MAX_TAIL);
                        manager.container_logs(name, tail as usize).await
                    }
                    _ => match intent.param_str("command") {
                        Some(command) => manager.exec(name, command).await,
                        None => TaskResult::failed("docker exec requires a 'command' parameter"),
                    },
                }
            }
            other => TaskResult::failed(format!("unknown docker op '{other}'")),
        };
        Ok(result)
    }
}
