//! Running Python programs inside a sandbox's container.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::container::WORKSPACE_MOUNT_POINT;
use crate::error::{Result, SandboxError};
use crate::path_guard;
use crate::registry::{SandboxRegistry, blocking};

/// Interpreter used for every execution.
pub const INTERPRETER: &str = "python";

/// File extension of the one executable source kind.
pub const SOURCE_EXTENSION: &str = "py";

/// Deadline applied when none is configured.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// A program to run: a workspace-relative `.py` path plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub path: String,
    pub args: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of a program that ran to completion (whatever its exit code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

/// Validates and runs execution requests against registered sandboxes.
pub struct ExecutionEngine {
    registry: Arc<SandboxRegistry>,
    timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<SandboxRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Deadline applied to every execution.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `request` inside sandbox `id`.
    ///
    /// The path is validated before the sandbox lock is taken; the file's
    /// existence is checked under the lock, immediately before the
    /// container exec. A run that outlives the deadline yields
    /// [`SandboxError::ExecutionTimeout`] rather than an exit code.
    pub async fn execute(&self, id: &str, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let sandbox = self.registry.get(id)?;

        let root = sandbox.workspace_path().to_path_buf();
        let path = request.path.clone();
        let relative = blocking(root.clone(), move || executable_path(&root, &path)).await?;

        let guard = sandbox.acquire().await?;
        let check = relative.clone();
        if !guard
            .with_workspace(move |ws| ws.contains_file(&check))
            .await?
        {
            return Err(SandboxError::FileNotFound(request.path.clone()));
        }

        let command = python_command(&relative, &request.args);
        let start = Instant::now();
        let output = match guard.container().exec(&command, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!(sandbox = %id, path = %relative, error = %e, "execution failed");
                return Err(e);
            }
        };
        let elapsed = start.elapsed();

        info!(
            sandbox = %id,
            path = %relative,
            exit_code = output.exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "execution finished"
        );
        Ok(ExecutionResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
        })
    }
}

/// Resolve a request path and check it names a Python source file.
///
/// Both the name as sent and the file it resolves to must carry the
/// `.py` extension. Returns the `/`-separated path of the resolved file
/// relative to the workspace root.
fn executable_path(root: &Path, user_path: &str) -> Result<String> {
    if !has_source_extension(Path::new(user_path)) {
        return Err(unsupported(user_path));
    }
    let resolved = path_guard::resolve(root, user_path)?;
    if !has_source_extension(&resolved) {
        return Err(unsupported(user_path));
    }
    let canonical_root = root.canonicalize().map_err(|e| SandboxError::io(root, e))?;
    path_guard::relative_to(&canonical_root, &resolved)
        .filter(|rel| !rel.is_empty())
        .ok_or_else(|| unsupported(user_path))
}

fn has_source_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
}

fn unsupported(user_path: &str) -> SandboxError {
    SandboxError::Validation(format!("unsupported file kind: {user_path:?}"))
}

/// The fixed interpreter invocation for a workspace-relative script.
pub fn python_command(relative: &str, args: &[String]) -> Vec<String> {
    let mut command = Vec::with_capacity(args.len() + 2);
    command.push(INTERPRETER.to_string());
    command.push(format!("{WORKSPACE_MOUNT_POINT}/{relative}"));
    command.extend(args.iter().cloned());
    command
}
