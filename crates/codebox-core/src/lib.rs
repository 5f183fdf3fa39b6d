#![deny(unsafe_code)]

//! codebox core: ephemeral sandboxes for running untrusted Python.
//!
//! Each sandbox pairs a host workspace directory with one long-lived,
//! locked-down container that bind-mounts it. Callers create sandboxes,
//! write files into them, execute `.py` programs inside the container, and
//! destroy them again; the [`api`] module exposes the same operations over
//! HTTP.
//!
//! Components, leaves first:
//!
//! - [`path_guard`]: containment checks for caller-supplied paths.
//! - [`workspace`]: the host file tree of one sandbox.
//! - [`container`]: the container of one sandbox, behind [`ContainerRuntime`].
//! - [`registry`]: id → (workspace, container), lifecycle and locking.
//! - [`execution`]: validated program runs with a deadline.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send` boxed future, used as the return type of trait
/// methods that must stay object-safe (`dyn ContainerRuntime`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP API: router, server, typed client, wire types.
pub mod api;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
pub mod container;
/// Service process wiring and shutdown.
pub mod daemon;
pub mod error;
pub mod execution;
pub mod path_guard;
pub mod registry;
pub mod workspace;

pub use container::{ContainerHandle, ContainerRuntime, DockerRuntime, ExecOutput, RuntimeError};
pub use daemon::{Daemon, DaemonError};
pub use error::{ErrorKind, Result, SandboxError};
pub use execution::{ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use registry::{Sandbox, SandboxId, SandboxRegistry, SandboxStatus};
pub use workspace::Workspace;
