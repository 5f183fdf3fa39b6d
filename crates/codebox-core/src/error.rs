//! Error taxonomy shared by every sandbox operation.

use std::path::PathBuf;
use std::time::Duration;

use crate::container::RuntimeError;

/// Errors from sandbox lifecycle, file, and execution operations.
///
/// Each variant maps to a distinct response at the API boundary; see
/// [`SandboxError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Bad or unsafe path, or a file kind that cannot be executed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown sandbox id, or a sandbox that is not active.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// The addressed file does not exist as a regular file.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The container runtime failed to create, exec, or destroy.
    #[error("container runtime error: {0}")]
    Container(#[from] RuntimeError),

    /// The execution did not finish within its deadline.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// Host filesystem failure unrelated to path validation.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of a [`SandboxError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Container,
    ExecutionTimeout,
    Io,
}

impl ErrorKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Container => "container",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::Io => "io",
        }
    }
}

impl SandboxError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SandboxError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::Validation(_) => ErrorKind::Validation,
            SandboxError::SandboxNotFound(_) | SandboxError::FileNotFound(_) => {
                ErrorKind::NotFound
            }
            SandboxError::Container(_) => ErrorKind::Container,
            SandboxError::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            SandboxError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Result alias for sandbox operations.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            SandboxError::Validation("x".to_string()),
            SandboxError::SandboxNotFound("x".to_string()),
            SandboxError::Container(RuntimeError::Spawn("x".to_string())),
            SandboxError::ExecutionTimeout(Duration::from_secs(1)),
            SandboxError::io("/x", std::io::Error::other("x")),
        ];
        let mut names: Vec<_> = errors.iter().map(|e| e.kind().as_str()).collect();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_file_and_sandbox_not_found_share_kind() {
        assert_eq!(
            SandboxError::FileNotFound("a.py".to_string()).kind(),
            SandboxError::SandboxNotFound("abc".to_string()).kind()
        );
    }

    #[test]
    fn test_io_display_names_path() {
        let err = SandboxError::io("/srv/box", std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "I/O error on /srv/box: disk full");
    }
}
