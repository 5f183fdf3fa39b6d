//! In-memory container runtime for tests.
//!
//! [`FakeRuntime`] records every call, keeps a table of "running"
//! containers, and answers `exec` through a programmable handler. Failure
//! switches let tests drive the registry's rollback paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codebox_core::BoxFuture;
use codebox_core::container::{ContainerRuntime, ContainerSpec, ExecOutput, RuntimeError};

type ExecHandler = Arc<dyn Fn(&ContainerSpec, &[String]) -> ExecOutput + Send + Sync>;

/// One recorded `exec` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub container: String,
    pub command: Vec<String>,
    pub timeout: Duration,
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, ContainerSpec>,
    exec_calls: Vec<ExecCall>,
    removed: Vec<String>,
    fail_create: bool,
    fail_remove: bool,
    exec_delay: Option<Duration>,
    exec_handler: Option<ExecHandler>,
}

/// Fake [`ContainerRuntime`]; cheap to clone, clones share state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<State>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("fake runtime state poisoned");
        f(&mut state)
    }

    /// Make `create` fail after leaving a partial container behind.
    pub fn set_fail_create(&self, fail: bool) {
        self.with_state(|s| s.fail_create = fail);
    }

    /// Make `remove` fail.
    pub fn set_fail_remove(&self, fail: bool) {
        self.with_state(|s| s.fail_remove = fail);
    }

    /// Make every `exec` take `delay`. A delay past the call's deadline
    /// ends in [`RuntimeError::Timeout`] at the deadline.
    pub fn set_exec_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.exec_delay = delay);
    }

    /// Answer `exec` calls with `handler` instead of an empty success.
    pub fn set_exec_handler<F>(&self, handler: F)
    where
        F: Fn(&ContainerSpec, &[String]) -> ExecOutput + Send + Sync + 'static,
    {
        self.with_state(|s| s.exec_handler = Some(Arc::new(handler)));
    }

    /// Register a container this runtime did not create (e.g. left over by
    /// an earlier process).
    pub fn insert_container(&self, name: &str) {
        let spec = ContainerSpec {
            name: name.to_string(),
            sandbox_id: String::new(),
            image: "fake".to_string(),
            workspace: Default::default(),
            tmpfs_size: "0".to_string(),
        };
        self.with_state(|s| s.containers.insert(name.to_string(), spec));
    }

    /// Names of the containers that currently exist.
    pub fn containers(&self) -> Vec<String> {
        self.with_state(|s| s.containers.keys().cloned().collect())
    }

    /// The spec a container was created with.
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.with_state(|s| s.containers.get(name).cloned())
    }

    /// Every `exec` call so far, in order.
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.with_state(|s| s.exec_calls.clone())
    }

    /// Every container name passed to `remove`, in order.
    pub fn removed(&self) -> Vec<String> {
        self.with_state(|s| s.removed.clone())
    }
}

fn failed(op: &'static str, container: &str, message: &str) -> RuntimeError {
    RuntimeError::Failed {
        op,
        container: container.to_string(),
        message: message.to_string(),
    }
}

impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn create(&self, spec: &ContainerSpec) -> BoxFuture<'_, Result<(), RuntimeError>> {
        let spec = spec.clone();
        Box::pin(async move {
            self.with_state(|s| {
                if s.containers.contains_key(&spec.name) {
                    return Err(failed("run", &spec.name, "Conflict. name already in use"));
                }
                if !spec.workspace.is_dir() {
                    return Err(failed("run", &spec.name, "bind source path does not exist"));
                }
                let fail = s.fail_create;
                s.containers.insert(spec.name.clone(), spec.clone());
                if fail {
                    return Err(failed("run", &spec.name, "injected create failure"));
                }
                Ok(())
            })
        })
    }

    fn exec(
        &self,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ExecOutput, RuntimeError>> {
        let call = ExecCall {
            container: container.to_string(),
            command: command.to_vec(),
            timeout,
        };
        Box::pin(async move {
            let (spec, delay, handler) = self.with_state(|s| {
                s.exec_calls.push(call.clone());
                (
                    s.containers.get(&call.container).cloned(),
                    s.exec_delay,
                    s.exec_handler.clone(),
                )
            });
            let Some(spec) = spec else {
                return Err(failed("exec", &call.container, "No such container"));
            };
            // A program slower than the deadline is killed when it passes.
            if let Some(delay) = delay {
                if delay > call.timeout {
                    tokio::time::sleep(call.timeout).await;
                    return Err(RuntimeError::Timeout(call.timeout));
                }
                tokio::time::sleep(delay).await;
            }
            Ok(match handler {
                Some(handler) => handler(&spec, &call.command),
                None => ExecOutput::default(),
            })
        })
    }

    fn remove(&self, container: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
        let container = container.to_string();
        Box::pin(async move {
            self.with_state(|s| {
                s.removed.push(container.clone());
                if s.fail_remove {
                    return Err(failed("rm", &container, "injected remove failure"));
                }
                s.containers.remove(&container);
                Ok(())
            })
        })
    }

    fn list(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, RuntimeError>> {
        let needle = format!("{prefix}-");
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.containers
                    .keys()
                    .filter(|name| name.starts_with(&needle))
                    .cloned()
                    .collect()
            }))
        })
    }
}

/// An exec handler that runs nothing but echoes a Python script's
/// `print('...')` lines, read from the container's host workspace.
///
/// Handy for asserting that the right file reached the interpreter.
pub fn print_only_python(spec: &ContainerSpec, command: &[String]) -> ExecOutput {
    let script = command
        .get(1)
        .and_then(|p| p.strip_prefix("/workspace/"))
        .map(|rel| spec.workspace.join(rel));
    let Some(source) = script.and_then(|p| std::fs::read_to_string(p).ok()) else {
        return ExecOutput {
            exit_code: 2,
            stdout: Vec::new(),
            stderr: b"can't open file\n".to_vec(),
        };
    };

    let mut stdout = String::new();
    for line in source.lines() {
        let line = line.trim();
        if let Some(inner) = line
            .strip_prefix("print(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            stdout.push_str(inner.trim_matches(|c| c == '\'' || c == '"'));
            stdout.push('\n');
        }
    }
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into_bytes(),
        stderr: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_exec_remove_cycle() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let spec = ContainerSpec {
            name: "box-1".to_string(),
            sandbox_id: "1".to_string(),
            image: "python:3.11-slim".to_string(),
            workspace: tmp.path().to_path_buf(),
            tmpfs_size: "64m".to_string(),
        };

        runtime.create(&spec).await.unwrap();
        assert_eq!(runtime.containers(), ["box-1"]);
        assert!(runtime.create(&spec).await.is_err());

        let out = runtime
            .exec("box-1", &["true".to_string()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(runtime.exec_calls().len(), 1);

        runtime.remove("box-1").await.unwrap();
        runtime.remove("box-1").await.unwrap();
        assert!(runtime.containers().is_empty());
        assert!(
            runtime
                .exec("box-1", &["true".to_string()], Duration::from_secs(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_exec_past_deadline_times_out_at_deadline() {
        let runtime = FakeRuntime::new();
        runtime.insert_container("box-1");
        runtime.set_exec_delay(Some(Duration::from_secs(30)));

        let start = std::time::Instant::now();
        let err = runtime
            .exec("box-1", &["true".to_string()], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let runtime = FakeRuntime::new();
        runtime.insert_container("code-sandbox-a");
        runtime.insert_container("code-sandboxes-b");
        runtime.insert_container("other-c");
        assert_eq!(
            runtime.list("code-sandbox").await.unwrap(),
            ["code-sandbox-a"]
        );
    }

    #[test]
    fn test_print_only_python() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.py"), "print('hello')\nx = 1\n").unwrap();
        let spec = ContainerSpec {
            name: "box".to_string(),
            sandbox_id: String::new(),
            image: String::new(),
            workspace: tmp.path().to_path_buf(),
            tmpfs_size: String::new(),
        };
        let out = print_only_python(
            &spec,
            &["python".to_string(), "/workspace/main.py".to_string()],
        );
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.exit_code, 0);
    }
}
