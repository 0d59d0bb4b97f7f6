use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use nexus_common::limits::resolve_exec_limits;
use nexus_common::{Intent, TaskResult};
use nexus_router::Handler;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncReadExt;

const MAX_LIST_ENTRIES: usize = 500;

/// Read-only file access confined to the gate's working directory.
pub struct FileHandler {
    root: PathBuf,
    configured: (Option<u64>, Option<u64>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirEntry {
    name: String,
    is_dir: bool,
    size: u64,
}

impl FileHandler {
    pub fn new(root: PathBuf, configured: (Option<u64>, Option<u64>)) -> Self {
        Self { root, configured }
    }

    /// Resolve `requested` under the root. Parent components and anything
    /// whose canonical form lands outside the root are refused.
    async fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let requested = Path::new(requested.trim());
        if requested.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(format!("refused: '{}' escapes the working directory", requested.display()));
        }

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|err| format!("working directory unavailable: {err}"))?;
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root.join(requested)
        };
        let target = tokio::fs::canonicalize(&joined)
            .await
            .map_err(|err| format!("{}: {err}", requested.display()))?;
        if !target.starts_with(&root) {
            return Err(format!("refused: '{}' is outside the working directory", requested.display()));
        }
        Ok(target)
    }

    async fn read(&self, intent: &Intent) -> Result<TaskResult> {
        let Some(requested) = intent.param_str("path") else {
            return Ok(TaskResult::failed("file read requires a 'path' parameter"));
        };
        let path = match self.resolve(requested).await {
            Ok(path) => path,
            Err(message) => return Ok(TaskResult::failed(message)),
        };
        let (limits, _) = resolve_exec_limits(None, intent.param_u64("maxOutputBytes"), self.configured);

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) => return Ok(TaskResult::failed(format!("{requested}: {err}"))),
        };
        let size = match file.metadata().await {
            Ok(meta) if meta.is_dir() => {
                return Ok(TaskResult::failed(format!("{requested} is a directory")));
            }
            Ok(meta) => meta.len(),
            Err(err) => return Ok(TaskResult::failed(format!("{requested}: {err}"))),
        };

        let mut bytes = Vec::new();
        if let Err(err) = file.take(limits.max_output_bytes).read_to_end(&mut bytes).await {
            return Ok(TaskResult::failed(format!("{requested}: {err}")));
        }
        let truncated = size > bytes.len() as u64;
        let mut content = String::from_utf8_lossy(&bytes).into_owned();
        if truncated {
            content.push_str(&format!("\n… [truncated {} bytes]", size - bytes.len() as u64));
        }

        Ok(TaskResult::ok_with(
            content.clone(),
            json!({
                "path": path.display().to_string(),
                "bytes": size,
                "truncated": truncated,
                "content": content,
            }),
        ))
    }

    async fn list(&self, intent: &Intent) -> Result<TaskResult> {
        let requested = intent.param_str("path").unwrap_or(".");
        let path = match self.resolve(requested).await {
            Ok(path) => path,
            Err(message) => return Ok(TaskResult::failed(message)),
        };

        Ok(listing_result(requested, &path, read_entries(&path).await))
    }
}

async fn read_entries(path: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut reader = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let meta = entry.metadata().await.ok();
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.as_ref().is_some_and(|m| m.is_dir()),
            size: meta.as_ref().map_or(0, |m| m.len()),
        });
    }
    Ok(entries)
}

/// A directory that cannot be read, at open or mid-iteration, is a failed
/// result rather than a handler fault.
fn listing_result(requested: &str, path: &Path, read: std::io::Result<Vec<DirEntry>>) -> TaskResult {
    let mut entries = match read {
        Ok(entries) => entries,
        Err(err) => return TaskResult::failed(format!("{requested}: {err}")),
    };
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let total = entries.len();
    entries.truncate(MAX_LIST_ENTRIES);

    let listing = entries
        .iter()
        .map(|e| if e.is_dir { format!("{}/", e.name) } else { e.name.clone() })
        .collect::<Vec<_>>()
        .join("\n");
    TaskResult::ok_with(
        if listing.is_empty() { format!("{requested} is empty") } else { listing },
        json!({ "path": path.display().to_string(), "total": total, "entries": entries }),
    )
}

#[async_trait]
impl Handler for FileHandler {
    async fn handle(&self, intent: Intent) -> Result<TaskResult> {
        match intent.param_str("op").unwrap_or("read") {
            "read" => self.read(&intent).await,
            "list" => self.list(&intent).await,
            other => Ok(TaskResult::failed(format!("unknown file op '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn unreadable_directory_is_a_failed_listing() {
        let result = listing_result(
            "logs",
            Path::new("/srv/logs"),
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")),
        );
        assert!(!result.succeeded);
        assert_eq!(result.message, "logs: permission denied");
    }

    #[test]
    fn listing_is_sorted_and_marks_directories() {
        let entries = vec![
            DirEntry { name: "b.txt".into(), is_dir: false, size: 3 },
            DirEntry { name: "a".into(), is_dir: true, size: 0 },
        ];
        let result = listing_result(".", Path::new("/srv"), Ok(entries));
        assert!(result.succeeded);
        assert_eq!(result.message, "a/\nb.txt");
        assert_eq!(result.payload.expect("payload")["total"], 2);
    }

    #[tokio::test]
    async fn listing_a_file_fails_without_a_fault() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("plain.txt"), "x")?;
        let handler = FileHandler::new(dir.path().to_path_buf(), (None, None));
        let intent = Intent::new("file-operation", "file", nexus_common::Origin::ChatChannel, "ls")
            .with_param("op", "list")
            .with_param("path", "plain.txt");

        let result = handler.handle(intent).await?;
        assert!(!result.succeeded);
        assert!(result.message.starts_with("plain.txt: "), "{}", result.message);
        Ok(())
    }
}
