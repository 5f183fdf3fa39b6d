//! One long-lived, locked-down container per sandbox.
//!
//! The container runtime is reached only through the narrow
//! [`ContainerRuntime`] trait (`create`, `exec`, `remove`, `list`) so the
//! rest of the core can be exercised against a fake. [`DockerRuntime`]
//! drives the Docker CLI in production.
//!
//! ## Security profile
//!
//! Every sandbox container is started with the same fixed profile; nothing
//! in a [`ContainerSpec`] can relax it:
//!
//! | Concern | Setting |
//! |---------|---------|
//! | Network | none |
//! | Root filesystem | read-only |
//! | Writable paths | the workspace bind mount at [`WORKSPACE_MOUNT_POINT`], a `noexec` tmpfs at `/tmp` |
//! | Privileges | `no-new-privileges`, all capabilities dropped |
//! | User | [`SANDBOX_USER`] |

mod docker;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::error::{Result, SandboxError};

pub use docker::DockerRuntime;

/// Where the workspace is mounted inside every container.
pub const WORKSPACE_MOUNT_POINT: &str = "/workspace";

/// Fixed non-root `uid:gid` that sandboxed code runs as.
pub const SANDBOX_USER: &str = "1000:1000";

/// Errors reported by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to invoke container runtime: {0}")]
    Spawn(String),

    #[error("{op} failed for {container}: {message}")]
    Failed {
        op: &'static str,
        container: String,
        message: String,
    },

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
}

/// Everything a runtime needs to start a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Deterministic container name (`<prefix>-<sandbox id>`).
    pub name: String,
    /// Sandbox id, attached as a label for operators.
    pub sandbox_id: String,
    /// Image to run.
    pub image: String,
    /// Host directory bind-mounted read-write at [`WORKSPACE_MOUNT_POINT`].
    pub workspace: PathBuf,
    /// Size of the `/tmp` tmpfs.
    pub tmpfs_size: String,
}

/// Captured result of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
}

/// Control API of a container runtime.
///
/// Implementations must apply the fixed security profile described in the
/// module docs on `create`, treat a missing container as success on
/// `remove`, and be safe for concurrent use.
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable name of this runtime (e.g. "docker").
    fn name(&self) -> &str;

    /// Whether the runtime is reachable.
    fn available(&self) -> BoxFuture<'_, bool>;

    /// Start a detached container that stays up until removed.
    fn create(&self, spec: &ContainerSpec) -> BoxFuture<'_, Result<(), RuntimeError>>;

    /// Run `command` inside a running container and wait for it.
    ///
    /// When `timeout` passes, the runtime must kill the command's process
    /// group inside the container and only then return
    /// [`RuntimeError::Timeout`].
    fn exec(
        &self,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ExecOutput, RuntimeError>>;

    /// Stop and remove a container.
    fn remove(&self, container: &str) -> BoxFuture<'_, Result<(), RuntimeError>>;

    /// Names of all containers (running or not) whose name starts with `prefix`.
    fn list(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, RuntimeError>>;
}

/// How long past its deadline a runtime may take to report a killed
/// command before [`ContainerHandle::exec`] stops waiting for it.
pub const RUNTIME_SLACK: Duration = Duration::from_secs(10);

/// Build the deterministic container name for a sandbox.
pub fn container_name(prefix: &str, sandbox_id: &str) -> String {
    format!("{prefix}-{sandbox_id}")
}

/// The container backing one sandbox.
pub struct ContainerHandle {
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("name", &self.name)
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl ContainerHandle {
    /// Start the container described by `spec`.
    ///
    /// On failure, whatever the runtime may have left behind under that name
    /// is removed before the error is returned.
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, spec: &ContainerSpec) -> Result<Self> {
        let start = Instant::now();
        if let Err(e) = runtime.create(spec).await {
            warn!(container = %spec.name, error = %e, "container creation failed, rolling back");
            if let Err(cleanup) = runtime.remove(&spec.name).await {
                warn!(container = %spec.name, error = %cleanup, "rollback removal failed");
            }
            return Err(SandboxError::Container(e));
        }
        info!(
            container = %spec.name,
            runtime = runtime.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "container started"
        );
        Ok(Self {
            name: spec.name.clone(),
            runtime,
        })
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a command inside the container, bounded by `timeout`.
    ///
    /// Returns [`SandboxError::ExecutionTimeout`] once the runtime has
    /// killed the command. A runtime that does not answer within
    /// [`RUNTIME_SLACK`] of the deadline is abandoned.
    pub async fn exec(&self, command: &[String], timeout: Duration) -> Result<ExecOutput> {
        if command.is_empty() {
            return Err(SandboxError::Validation(
                "command must not be empty".to_string(),
            ));
        }
        debug!(container = %self.name, cmd = ?command, "exec");
        let call = self.runtime.exec(&self.name, command, timeout);
        match tokio::time::timeout(timeout + RUNTIME_SLACK, call).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(RuntimeError::Timeout(_))) => Err(SandboxError::ExecutionTimeout(timeout)),
            Ok(Err(e)) => Err(SandboxError::Container(e)),
            Err(_) => {
                warn!(container = %self.name, ?timeout, "runtime did not report the timed-out command");
                Err(SandboxError::ExecutionTimeout(timeout))
            }
        }
    }

    /// Stop and remove the container. Missing containers are not an error.
    pub async fn destroy(&self) -> Result<()> {
        self.runtime.remove(&self.name).await?;
        info!(container = %self.name, "container removed");
        Ok(())
    }
}
