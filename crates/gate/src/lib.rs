//! Command gate for host shell execution.
//!
//! Every command is checked against an ordered denylist before anything is
//! spawned. Accepted commands run under `sh -c` in a fixed working
//! directory, in their own process group, with a hard timeout that kills
//! the whole group and output capped at a byte budget.

pub mod patterns;

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use patterns::{DangerPattern, DEFAULT_DENYLIST};

const READ_CHUNK: usize = 8 * 1024;
const READER_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Error)]
pub enum GateError {
    #[error("command refused: matches danger pattern '{pattern}'")]
    Refused { pattern: String },

    #[error("command is empty")]
    EmptyCommand,

    #[error("command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("failed to run command: {0}")]
    Spawn(#[from] io::Error),
}

impl GateError {
    pub fn is_refusal(&self) -> bool {
        matches!(self, GateError::Refused { .. } | GateError::EmptyCommand)
    }
}

/// Captured outcome of a command that ran to completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub terminated_by_signal: Option<i32>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn exit_summary(&self) -> String {
        match (self.exit_code, self.terminated_by_signal) {
            (Some(code), _) => format!("exit {code}"),
            (None, Some(sig)) => format!("signal {sig}"),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

pub struct CommandGate {
    working_dir: PathBuf,
    shell: String,
    denylist: Vec<DangerPattern>,
    spawned: AtomicU64,
}

impl CommandGate {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            shell: DEFAULT_SHELL.to_string(),
            denylist: DEFAULT_DENYLIST.clone(),
            spawned: AtomicU64::new(0),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Append extra patterns after the built-in ones.
    pub fn with_extra_patterns(mut self, extra: impl IntoIterator<Item = DangerPattern>) -> Self {
        self.denylist.extend(extra);
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn denylist(&self) -> &[DangerPattern] {
        &self.denylist
    }

    /// Number of subprocesses this gate has attempted to spawn.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// First-match denylist check.
    pub fn check(&self, command: &str) -> Result<(), GateError> {
        if command.trim().is_empty() {
            return Err(GateError::EmptyCommand);
        }
        match self.denylist.iter().find(|p| p.is_match(command)) {
            Some(pattern) => Err(GateError::Refused {
                pattern: pattern.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Check `command` against the denylist, then run it under the shell.
    ///
    /// `max_output_bytes` caps stdout and stderr independently, so a command
    /// can keep up to twice the cap in total. Bytes past the cap are drained
    /// and counted but not kept.
    pub async fn execute(
        &self,
        command: &str,
        timeout_ms: u64,
        max_output_bytes: usize,
    ) -> Result<ExecOutput, GateError> {
        if let Err(err) = self.check(command) {
            warn!(error = %err, "Command refused by gate");
            return Err(err);
        }

        let start = Instant::now();
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!(?pid, working_dir = %self.working_dir.display(), "Spawned gated command");

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_bounded(out, max_output_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, max_output_bytes)));

        let timeout = Duration::from_millis(timeout_ms);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_elapsed) => {
                kill_group(pid);
                let _ = child.kill().await;
                abort(stdout_task);
                abort(stderr_task);
                warn!(?pid, timeout_ms, "Gated command timed out; process group killed");
                return Err(GateError::Timeout { timeout_ms });
            }
        };

        let stdout = collect(stdout_task, pid).await;
        let stderr = collect(stderr_task, pid).await;

        #[cfg(unix)]
        let terminated_by_signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let terminated_by_signal = None;

        let output = ExecOutput {
            exit_code: status.code(),
            terminated_by_signal,
            duration_ms: start.elapsed().as_millis() as u64,
            stdout_truncated: stdout.truncated(),
            stderr_truncated: stderr.truncated(),
            stdout: stdout.render(),
            stderr: stderr.render(),
        };
        info!(
            ?pid,
            exit = %output.exit_summary(),
            duration_ms = output.duration_ms,
            "Gated command finished"
        );
        Ok(output)
    }
}

#[derive(Debug, Default)]
struct Captured {
    kept: Vec<u8>,
    total: usize,
}

impl Captured {
    fn truncated(&self) -> bool {
        self.total > self.kept.len()
    }

    fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.kept).into_owned();
        if self.truncated() {
            text.push_str(&format!(
                "\n… [truncated {} bytes]",
                self.total - self.kept.len()
            ));
        }
        text
    }
}

// Keeps the first `limit` bytes and keeps draining so the child never
// blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> io::Result<Captured> {
    let mut captured = Captured {
        kept: Vec::with_capacity(limit.min(READ_CHUNK)),
        total: 0,
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        captured.total += n;
        let room = limit.saturating_sub(captured.kept.len());
        if room > 0 {
            captured.kept.extend_from_slice(&chunk[..n.min(room)]);
        }
    }
    Ok(captured)
}

// Background children can keep the pipes open after the shell exits;
// killing the group closes them.
async fn collect(task: Option<JoinHandle<io::Result<Captured>>>, pid: Option<u32>) -> Captured {
    let Some(mut task) = task else {
        return Captured::default();
    };
    let joined = match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            kill_group(pid);
            match tokio::time::timeout(READER_GRACE, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    debug!(?pid, "Output reader still blocked after group kill");
                    return Captured::default();
                }
            }
        }
    };
    match joined {
        Ok(Ok(captured)) => captured,
        Ok(Err(err)) => {
            debug!(error = %err, "Output reader failed");
            Captured::default()
        }
        Err(join_err) => {
            debug!(error = %join_err, "Output reader task failed");
            Captured::default()
        }
    }
}

fn abort(task: Option<JoinHandle<io::Result<Captured>>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %err, "killpg failed (group already gone?)");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_marks_truncation() {
        let captured = Captured {
            kept: b"abc".to_vec(),
            total: 10,
        };
        assert!(captured.truncated());
        assert_eq!(captured.render(), "abc\n… [truncated 7 bytes]");

        let whole = Captured {
            kept: b"abc".to_vec(),
            total: 3,
        };
        assert_eq!(whole.render(), "abc");
    }

    #[test]
    fn check_reports_first_matching_pattern() {
        let gate = CommandGate::new("/tmp");
        match gate.check("rm -rf /") {
            Err(GateError::Refused { pattern }) => assert_eq!(pattern, "recursive-delete-root"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(gate.check("   "), Err(GateError::EmptyCommand)));
        assert!(gate.check("echo hello").is_ok());
    }
}
