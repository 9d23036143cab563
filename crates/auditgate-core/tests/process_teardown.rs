//! Integration tests for audit process teardown.
//!
//! The shell scripts stand in for an engine that starts its own browser:
//! `sh` is the direct child and the backgrounded `sleep` is the grandchild
//! whose pid gets written to a file.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use auditgate_core::{
    AuditEngine, AuditInvoker, AuditTarget, CancelToken, Cancellation, CommandEngine,
    EngineConfig, FailureKind,
};

fn target() -> AuditTarget {
    AuditTarget {
        url: "https://example.com/".to_string(),
        runs: 1,
        engine: Arc::new(EngineConfig::default()),
    }
}

/// Engine whose grandchild outlives the direct child unless the group is killed.
fn spawning_engine(pid_file: &Path, tail: &str) -> Arc<dyn AuditEngine> {
    let script = format!(
        "sleep 30 >/dev/null 2>&1 & echo $! > '{}'; {tail}",
        pid_file.display()
    );
    Arc::new(CommandEngine::new("sh").with_args(["-c".to_string(), script]))
}

fn read_pid(pid_file: &Path) -> u32 {
    std::fs::read_to_string(pid_file)
        .expect("pid file written")
        .trim()
        .parse()
        .expect("numeric pid")
}

/// Running means present in /proc and not a zombie.
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

async fn assert_gone(pid: u32) {
    for _ in 0..50 {
        if !is_running(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("process {pid} still running after teardown");
}

/// Test: a timed-out attempt takes the engine's child processes down with it
#[tokio::test]
async fn test_timeout_kills_grandchild() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("browser.pid");
    let engine = spawning_engine(&pid_file, "wait");
    let invoker = AuditInvoker::new(engine, Duration::from_secs(1), Duration::from_secs(1));

    let attempt = invoker.invoke(&target(), 0, &CancelToken::never()).await;

    assert_eq!(attempt.error().map(|e| e.kind), Some(FailureKind::Timeout));
    assert_gone(read_pid(&pid_file)).await;
}

/// Test: cancellation past the grace period tears down the whole group
#[tokio::test]
async fn test_cancellation_kills_grandchild() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("browser.pid");
    let engine = spawning_engine(&pid_file, "wait");
    let invoker = AuditInvoker::new(engine, Duration::from_secs(60), Duration::from_millis(300));

    let cancellation = Cancellation::new();
    let token = cancellation.token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancellation.cancel();
    });

    let attempt = invoker.invoke(&target(), 0, &token).await;

    assert_eq!(attempt.error().map(|e| e.kind), Some(FailureKind::Cancelled));
    assert_gone(read_pid(&pid_file)).await;
}

/// Test: processes left behind by an engine that exited normally are reaped
#[tokio::test]
async fn test_leftover_processes_killed_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("browser.pid");
    let engine = spawning_engine(
        &pid_file,
        r#"echo '{"audits":{"interactive":{"numericValue":1500}}}'"#,
    );
    let invoker = AuditInvoker::new(engine, Duration::from_secs(10), Duration::from_secs(1));

    let attempt = invoker.invoke(&target(), 0, &CancelToken::never()).await;

    assert!(attempt.is_success(), "{:?}", attempt.outcome);
    assert_gone(read_pid(&pid_file)).await;
}
