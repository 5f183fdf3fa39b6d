//! Docker CLI runtime.
//!
//! Shells out to `docker run`, `docker exec`, `docker rm`, `docker ps`, and
//! `docker inspect`. The per-sandbox container is started detached with
//! `sleep infinity` as its main process, and every execution is a
//! `docker exec` into it.
//!
//! Every command runs under `timeout --signal=KILL <deadline>` inside the
//! container. `timeout` puts itself and the command in a fresh process
//! group and kills that whole group when the deadline passes, so by the
//! time `docker exec` returns the program is gone. The host waits up to
//! [`KILL_GRACE`] past the deadline to collect that exit.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::BoxFuture;

use super::{
    ContainerRuntime, ContainerSpec, ExecOutput, RuntimeError, SANDBOX_USER,
    WORKSPACE_MOUNT_POINT,
};

/// How long past the deadline the host waits for the killed command to be
/// reported before giving up on the `docker exec` client.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Label key attached to every sandbox container.
const SANDBOX_LABEL: &str = "codebox.sandbox";

/// Prefix the Docker daemon puts on its own error messages.
const DAEMON_ERROR: &str = "Error response from daemon";

/// Prefix of the error docker reports when the command cannot be started.
const OCI_EXEC_ERROR: &str = "OCI runtime exec failed";

/// Exit status of a `timeout --signal=KILL` that fired: it kills its own
/// process group, itself included.
const KILLED_STATUS: i32 = 128 + 9;

/// Container runtime backed by the `docker` command-line client.
pub struct DockerRuntime {
    docker_bin: PathBuf,
}

impl DockerRuntime {
    /// Create a runtime that invokes the given Docker binary.
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Build the `docker run` argument list for a sandbox container.
    fn build_run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        // Locked-down profile
        args.extend(["--network".to_string(), "none".to_string()]);
        args.push("--read-only".to_string());
        args.extend([
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
        ]);
        args.extend(["--cap-drop".to_string(), "ALL".to_string()]);
        args.extend(["--user".to_string(), SANDBOX_USER.to_string()]);

        // Writable paths
        args.extend([
            "--tmpfs".to_string(),
            format!("/tmp:rw,noexec,nosuid,size={}", spec.tmpfs_size),
        ]);
        args.extend([
            "-v".to_string(),
            format!("{}:{WORKSPACE_MOUNT_POINT}:rw", spec.workspace.display()),
        ]);
        args.extend(["--workdir".to_string(), WORKSPACE_MOUNT_POINT.to_string()]);

        args.extend([
            "--label".to_string(),
            format!("{SANDBOX_LABEL}={}", spec.sandbox_id),
        ]);

        args.push(spec.image.clone());
        args.extend(["sleep".to_string(), "infinity".to_string()]);
        args
    }

    /// Build the `docker exec` argument list for one command.
    fn build_exec_args(container: &str, command: &[String], timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--workdir".to_string(),
            WORKSPACE_MOUNT_POINT.to_string(),
            container.to_string(),
            "timeout".to_string(),
            "--signal=KILL".to_string(),
            deadline_arg(timeout),
        ];
        args.extend(command.iter().cloned());
        args
    }

    /// Whether the container exists and is running.
    async fn is_running(&self, container: &str) -> bool {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            container.to_string(),
        ];
        self.docker(&args).await.is_ok_and(|out| {
            out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true"
        })
    }

    /// Run a short Docker control command to completion.
    async fn docker(&self, args: &[String]) -> Result<Output, RuntimeError> {
        tokio::process::Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Spawn(format!("{}: {e}", self.docker_bin.display())))
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

/// `timeout` duration argument; whole seconds where possible, never `0`
/// (which would disable the limit).
fn deadline_arg(timeout: Duration) -> String {
    let timeout = timeout.max(Duration::from_millis(1));
    if timeout.subsec_nanos() == 0 {
        timeout.as_secs().to_string()
    } else {
        format!("{:.3}", timeout.as_secs_f64())
    }
}

/// How `docker exec` failed, judged from its exit status and stderr alone.
#[derive(Debug, PartialEq, Eq)]
enum ExecFailure {
    /// Docker's reserved statuses with docker's own message: the command
    /// never ran.
    Runtime,
    /// A daemon message on an ordinary status. Either docker failed or the
    /// program printed it; only the container state can tell.
    Ambiguous,
    /// The program's own exit.
    Program,
}

fn classify_exit(code: Option<i32>, stderr: &str) -> ExecFailure {
    match code {
        Some(0) => ExecFailure::Program,
        Some(125) if stderr.starts_with(DAEMON_ERROR) => ExecFailure::Runtime,
        Some(126 | 127) if stderr.starts_with(OCI_EXEC_ERROR) => ExecFailure::Runtime,
        Some(_) if stderr.starts_with(DAEMON_ERROR) => ExecFailure::Ambiguous,
        _ => ExecFailure::Program,
    }
}

impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    fn available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.docker(&["version".to_string()])
                .await
                .is_ok_and(|out| out.status.success())
        })
    }

    fn create(&self, spec: &ContainerSpec) -> BoxFuture<'_, Result<(), RuntimeError>> {
        let args = Self::build_run_args(spec);
        let name = spec.name.clone();
        Box::pin(async move {
            debug!(runtime = "docker", container = %name, args = ?args, "docker run");
            let output = self.docker(&args).await?;
            if !output.status.success() {
                return Err(RuntimeError::Failed {
                    op: "run",
                    container: name,
                    message: stderr_text(&output),
                });
            }
            Ok(())
        })
    }

    fn exec(
        &self,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ExecOutput, RuntimeError>> {
        let args = Self::build_exec_args(container, command, timeout);
        let container = container.to_string();
        Box::pin(async move {
            debug!(runtime = "docker", container = %container, args = ?args, "docker exec");

            // Dropping the child kills the exec client.
            let start = Instant::now();
            let child = tokio::process::Command::new(&self.docker_bin)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| RuntimeError::Spawn(format!("{}: {e}", self.docker_bin.display())))?;

            let output =
                match tokio::time::timeout(timeout + KILL_GRACE, child.wait_with_output()).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => return Err(RuntimeError::Spawn(format!("docker exec wait: {e}"))),
                    Err(_) => {
                        warn!(container = %container, ?timeout, "docker exec did not return after the deadline");
                        return Err(RuntimeError::Timeout(timeout));
                    }
                };

            let code = output.status.code();
            if start.elapsed() >= timeout && matches!(code, None | Some(KILLED_STATUS)) {
                debug!(container = %container, ?timeout, "command killed at deadline");
                return Err(RuntimeError::Timeout(timeout));
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let runtime_failed = match classify_exit(code, &stderr) {
                ExecFailure::Runtime => true,
                ExecFailure::Ambiguous => !self.is_running(&container).await,
                ExecFailure::Program => false,
            };
            if runtime_failed {
                return Err(RuntimeError::Failed {
                    op: "exec",
                    container,
                    message: stderr.trim().to_string(),
                });
            }

            Ok(ExecOutput {
                exit_code: code.unwrap_or(-1),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        })
    }

    fn remove(&self, container: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
        let container = container.to_string();
        Box::pin(async move {
            let args = ["rm".to_string(), "-f".to_string(), container.clone()];
            let output = self.docker(&args).await?;
            if output.status.success() {
                return Ok(());
            }
            let message = stderr_text(&output);
            if is_missing_container(&message) {
                debug!(container = %container, "container already gone");
                return Ok(());
            }
            Err(RuntimeError::Failed {
                op: "rm",
                container,
                message,
            })
        })
    }

    fn list(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, RuntimeError>> {
        let needle = format!("{prefix}-");
        Box::pin(async move {
            let args = [
                "ps".to_string(),
                "--all".to_string(),
                "--filter".to_string(),
                format!("name={needle}"),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ];
            let output = self.docker(&args).await?;
            if !output.status.success() {
                return Err(RuntimeError::Failed {
                    op: "ps",
                    container: needle,
                    message: stderr_text(&output),
                });
            }
            // The name filter matches substrings; keep true prefix matches only.
            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|name| name.starts_with(&needle))
                .map(str::to_string)
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "code-sandbox-0123abcd".to_string(),
            sandbox_id: "0123abcd".to_string(),
            image: "python:3.11-slim".to_string(),
            workspace: PathBuf::from("/srv/sandboxes/0123abcd"),
            tmpfs_size: "64m".to_string(),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let idx = args.iter().position(|a| a == flag).unwrap();
        &args[idx + 1]
    }

    #[test]
    fn test_docker_runtime_name() {
        assert_eq!(DockerRuntime::default().name(), "docker");
    }

    #[test]
    fn test_run_args_security_profile() {
        let args = DockerRuntime::build_run_args(&spec());

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--detach".to_string()));
        assert_eq!(value_after(&args, "--network"), "none");
        assert!(args.contains(&"--read-only".to_string()));
        assert_eq!(value_after(&args, "--security-opt"), "no-new-privileges");
        assert_eq!(value_after(&args, "--cap-drop"), "ALL");
        assert_eq!(value_after(&args, "--user"), "1000:1000");
        assert_eq!(
            value_after(&args, "--tmpfs"),
            "/tmp:rw,noexec,nosuid,size=64m"
        );
    }

    #[test]
    fn test_run_args_mount_name_and_label() {
        let args = DockerRuntime::build_run_args(&spec());

        assert_eq!(value_after(&args, "--name"), "code-sandbox-0123abcd");
        assert_eq!(
            value_after(&args, "-v"),
            "/srv/sandboxes/0123abcd:/workspace:rw"
        );
        assert_eq!(value_after(&args, "--workdir"), "/workspace");
        assert_eq!(value_after(&args, "--label"), "codebox.sandbox=0123abcd");
    }

    #[test]
    fn test_run_args_end_with_image_and_idle_command() {
        let args = DockerRuntime::build_run_args(&spec());
        let tail: Vec<&str> = args[args.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, ["python:3.11-slim", "sleep", "infinity"]);
    }

    #[test]
    fn test_exec_args_wrap_command_in_timeout() {
        let command = vec!["python".to_string(), "/workspace/main.py".to_string()];
        let args = DockerRuntime::build_exec_args("box-1", &command, Duration::from_secs(30));

        assert_eq!(
            args,
            [
                "exec",
                "--workdir",
                "/workspace",
                "box-1",
                "timeout",
                "--signal=KILL",
                "30",
                "python",
                "/workspace/main.py",
            ]
        );
    }

    #[test]
    fn test_deadline_is_the_timeout_itself() {
        assert_eq!(deadline_arg(Duration::from_millis(1500)), "1.500");
        assert_eq!(deadline_arg(Duration::from_millis(50)), "0.050");
        assert_eq!(deadline_arg(Duration::ZERO), "0.001");
    }

    #[test]
    fn test_exit_classification() {
        let daemon = "Error response from daemon: container abc is not running";
        assert_eq!(classify_exit(Some(125), daemon), ExecFailure::Runtime);
        assert_eq!(
            classify_exit(Some(126), "OCI runtime exec failed: exec failed: permission denied"),
            ExecFailure::Runtime
        );
        assert_eq!(classify_exit(Some(1), daemon), ExecFailure::Ambiguous);
        assert_eq!(classify_exit(Some(125), "Traceback..."), ExecFailure::Program);
        assert_eq!(classify_exit(Some(127), "python: not found"), ExecFailure::Program);
        assert_eq!(classify_exit(Some(0), daemon), ExecFailure::Program);
        assert_eq!(classify_exit(None, ""), ExecFailure::Program);
    }

    #[test]
    fn test_missing_container_detection() {
        assert!(is_missing_container(
            "Error response from daemon: No such container: code-sandbox-x"
        ));
        assert!(!is_missing_container("permission denied"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let runtime = DockerRuntime::new("/nonexistent/docker-binary");
        assert!(!runtime.available().await);
        let err = runtime.remove("whatever").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn(_)));
    }
}
