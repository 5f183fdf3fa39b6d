//! `DockerRuntime` against a scripted `docker` binary that runs exec'd
//! commands on the host, so deadline and failure handling can be checked
//! without a Docker daemon.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use codebox_core::container::ContainerSpec;
use codebox_core::{ContainerHandle, DockerRuntime, SandboxError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// `docker exec --workdir /workspace <name> cmd...` runs `cmd...` here; the
/// container always reports as running.
const RUNNING: &str = r#"case "$1" in
  exec) shift 4; exec "$@" ;;
  inspect) echo true ;;
esac
"#;

/// Every exec fails the way docker does for a stopped container.
const STOPPED: &str = r#"case "$1" in
  exec) echo "Error response from daemon: container box is not running" >&2; exit 1 ;;
  inspect) echo false ;;
esac
"#;

fn stub_docker(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("docker");
    std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn handle(tmp: &TempDir, script: &str) -> ContainerHandle {
    let runtime = Arc::new(DockerRuntime::new(stub_docker(tmp.path(), script)));
    let spec = ContainerSpec {
        name: "box".to_string(),
        sandbox_id: "0123".to_string(),
        image: "python:3.11-slim".to_string(),
        workspace: tmp.path().to_path_buf(),
        tmpfs_size: "64m".to_string(),
    };
    ContainerHandle::create(runtime, &spec).await.unwrap()
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

#[test_log::test(tokio::test)]
async fn timed_out_program_is_dead_when_the_error_returns() {
    let tmp = TempDir::new().unwrap();
    let container = handle(&tmp, RUNNING).await;
    let marker = tmp.path().join("marker");

    let start = Instant::now();
    let err = container
        .exec(
            &sh(&format!("sleep 2; touch {}", marker.display())),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ExecutionTimeout(_)), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists(), "program kept running after the timeout");
}

#[test_log::test(tokio::test)]
async fn output_and_exit_code_pass_through() {
    let tmp = TempDir::new().unwrap();
    let container = handle(&tmp, RUNNING).await;

    let out = container
        .exec(&sh("echo out; echo err >&2; exit 3"), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(out.exit_code, 3);
    assert_eq!(out.stdout, b"out\n");
    assert_eq!(out.stderr, b"err\n");
}

#[test_log::test(tokio::test)]
async fn program_printing_a_daemon_error_is_still_program_output() {
    let tmp = TempDir::new().unwrap();
    let container = handle(&tmp, RUNNING).await;

    let out = container
        .exec(
            &sh("echo 'Error response from daemon: fake' >&2; exit 1"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(out.exit_code, 1);
    assert_eq!(out.stderr, b"Error response from daemon: fake\n");
}

#[test_log::test(tokio::test)]
async fn exec_into_stopped_container_is_a_container_error() {
    let tmp = TempDir::new().unwrap();
    let container = handle(&tmp, STOPPED).await;

    let err = container
        .exec(&sh("true"), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Container(_)), "{err:?}");
}
