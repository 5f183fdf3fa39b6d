//! End-to-end runs against a real Docker daemon.
//!
//! Ignored by default; run with `cargo test -p codebox-core --test
//! docker_live -- --ignored` on a host with Docker and the image pulled.

use std::sync::Arc;
use std::time::Duration;

use codebox_config::SandboxSettings;
use codebox_core::container::ContainerRuntime;
use codebox_core::{DockerRuntime, ExecutionEngine, ExecutionRequest, SandboxError, SandboxRegistry};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn setup(timeout: Duration) -> (TempDir, Arc<SandboxRegistry>, ExecutionEngine) {
    let tmp = TempDir::new().unwrap();
    let settings = SandboxSettings {
        root: tmp.path().join("sandboxes"),
        container_prefix: "codebox-live-test".to_string(),
        ..SandboxSettings::default()
    };
    let registry = Arc::new(SandboxRegistry::new(
        &settings,
        Arc::new(DockerRuntime::default()),
    ));
    let engine = ExecutionEngine::new(Arc::clone(&registry), timeout);
    (tmp, registry, engine)
}

#[test_log::test(tokio::test)]
#[ignore = "requires a docker daemon"]
async fn hello_world_in_a_real_container() {
    let (_tmp, registry, engine) = setup(Duration::from_secs(30));
    let id = registry.create_sandbox().await.unwrap();

    registry
        .write_file(id.as_str(), "main.py", b"print('hello')\n".to_vec())
        .await
        .unwrap();
    let result = engine
        .execute(id.as_str(), &ExecutionRequest::new("main.py"))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(String::from_utf8_lossy(&result.stdout), "hello\n");
    assert_eq!(String::from_utf8_lossy(&result.stderr), "");

    registry.delete_sandbox(id.as_str()).await.unwrap();
    let left = DockerRuntime::default()
        .list("codebox-live-test")
        .await
        .unwrap();
    assert!(left.is_empty(), "containers left behind: {left:?}");
}

#[test_log::test(tokio::test)]
#[ignore = "requires a docker daemon"]
async fn sandbox_has_no_network_and_a_read_only_root() {
    let (_tmp, registry, engine) = setup(Duration::from_secs(30));
    let id = registry.create_sandbox().await.unwrap();

    let escape_attempts = "\
import socket, sys
try:
    socket.create_connection(('1.1.1.1', 53), timeout=2)
    print('network: open')
except OSError:
    print('network: closed')
try:
    open('/etc/planted', 'w')
    print('root: writable')
except OSError:
    print('root: read-only')
open('/workspace/out.txt', 'w').write('ok')
";
    registry
        .write_file(id.as_str(), "escape.py", escape_attempts.as_bytes().to_vec())
        .await
        .unwrap();
    let result = engine
        .execute(id.as_str(), &ExecutionRequest::new("escape.py"))
        .await
        .unwrap();

    assert_eq!(
        String::from_utf8_lossy(&result.stdout),
        "network: closed\nroot: read-only\n"
    );
    assert_eq!(
        registry.read_file(id.as_str(), "out.txt").await.unwrap(),
        b"ok"
    );
    registry.delete_sandbox(id.as_str()).await.unwrap();
}

#[test_log::test(tokio::test)]
#[ignore = "requires a docker daemon"]
async fn runaway_program_times_out() {
    let (_tmp, registry, engine) = setup(Duration::from_secs(2));
    let id = registry.create_sandbox().await.unwrap();
    registry
        .write_file(id.as_str(), "main.py", b"while True:\n    pass\n".to_vec())
        .await
        .unwrap();

    let err = engine
        .execute(id.as_str(), &ExecutionRequest::new("main.py"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ExecutionTimeout(_)));

    registry.delete_sandbox(id.as_str()).await.unwrap();
}
