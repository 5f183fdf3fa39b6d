//! Sandbox registry: id → (workspace, container), plus the lifecycle
//! state machine that keeps the two resources in step.
//!
//! ```text
//! Creating ──▶ Active ──▶ Deleting ──▶ Deleted
//!     │                                   ▲
//!     └──────────── (rollback) ───────────┘
//! ```
//!
//! The map itself sits behind a short-lived `std::sync::RwLock` that is
//! never held across an `.await`. Each sandbox carries its own async
//! mutex; lifecycle changes, file operations and executions on one
//! sandbox are serialized through it while different sandboxes proceed in
//! parallel.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use codebox_config::SandboxSettings;

use crate::container::{ContainerHandle, ContainerRuntime, ContainerSpec, container_name};
use crate::error::{Result, SandboxError};
use crate::workspace::Workspace;

// ── Identity & status ───────────────────────────────────────────────

/// Opaque sandbox identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SandboxId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where a sandbox is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Creating,
    Active,
    Deleting,
    Deleted,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Creating => "creating",
            SandboxStatus::Active => "active",
            SandboxStatus::Deleting => "deleting",
            SandboxStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

// ── Sandbox ─────────────────────────────────────────────────────────

/// The resources owned by a live sandbox.
#[derive(Debug)]
struct Resources {
    workspace: Workspace,
    container: ContainerHandle,
}

/// One sandbox: identity, status, and its lock-guarded resources.
#[derive(Debug)]
pub struct Sandbox {
    id: SandboxId,
    workspace_path: PathBuf,
    container_name: String,
    status: Mutex<SandboxStatus>,
    /// Per-sandbox lock. `None` until creation succeeds and again after
    /// teardown.
    resources: tokio::sync::Mutex<Option<Resources>>,
}

impl Sandbox {
    fn new(id: SandboxId, workspace_path: PathBuf, container_name: String) -> Self {
        Self {
            id,
            workspace_path,
            container_name,
            status: Mutex::new(SandboxStatus::Creating),
            resources: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Host directory backing this sandbox.
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Name of the backing container.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Current status, without waiting for the sandbox lock.
    pub fn status(&self) -> SandboxStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SandboxStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        debug!(sandbox = %self.id, %status, "status changed");
    }

    /// Take the sandbox lock, then confirm the sandbox is still active.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn acquire(&self) -> Result<SandboxGuard<'_>> {
        let guard = self.resources.lock().await;
        if self.status() != SandboxStatus::Active {
            return Err(SandboxError::SandboxNotFound(self.id.to_string()));
        }
        let guard = tokio::sync::MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| SandboxError::SandboxNotFound(self.id.to_string()))?;
        Ok(SandboxGuard { guard })
    }
}

/// Exclusive access to an active sandbox's resources.
pub struct SandboxGuard<'a> {
    guard: tokio::sync::MappedMutexGuard<'a, Resources>,
}

impl SandboxGuard<'_> {
    pub fn workspace(&self) -> &Workspace {
        &self.guard.workspace
    }

    pub fn container(&self) -> &ContainerHandle {
        &self.guard.container
    }

    /// Run a synchronous workspace operation on the blocking pool.
    pub async fn with_workspace<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Workspace) -> Result<T> + Send + 'static,
    {
        let workspace = self.workspace().clone();
        blocking(workspace.root().to_path_buf(), move || op(&workspace)).await
    }
}

/// Run filesystem work on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(context: PathBuf, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| SandboxError::io(context, std::io::Error::other(e)))?
}

// ── Registry ────────────────────────────────────────────────────────

/// Owns every sandbox known to this process.
pub struct SandboxRegistry {
    root: PathBuf,
    prefix: String,
    image: String,
    tmpfs_size: String,
    runtime: Arc<dyn ContainerRuntime>,
    sandboxes: RwLock<HashMap<SandboxId, Arc<Sandbox>>>,
}

impl SandboxRegistry {
    /// Create an empty registry over `runtime`.
    pub fn new(settings: &SandboxSettings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            root: settings.root.clone(),
            prefix: settings.container_prefix.clone(),
            image: settings.image.clone(),
            tmpfs_size: settings.tmpfs_size.clone(),
            runtime,
            sandboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Directory that holds every workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The container runtime in use.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<SandboxId, Arc<Sandbox>>> {
        self.sandboxes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<SandboxId, Arc<Sandbox>>> {
        self.sandboxes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provision a new sandbox: workspace directory first, then container.
    ///
    /// If either step fails the completed step is undone and nothing of
    /// the sandbox remains, in the map or on the host.
    pub async fn create_sandbox(&self) -> Result<SandboxId> {
        let id = SandboxId::generate();
        let sandbox = Arc::new(Sandbox::new(
            id.clone(),
            self.root.join(id.as_str()),
            container_name(&self.prefix, id.as_str()),
        ));

        let mut slot = sandbox.resources.lock().await;
        self.write_map().insert(id.clone(), Arc::clone(&sandbox));

        match self.provision(&sandbox).await {
            Ok(resources) => {
                *slot = Some(resources);
                sandbox.set_status(SandboxStatus::Active);
                info!(sandbox = %id, container = sandbox.container_name(), "sandbox created");
                Ok(id)
            }
            Err(e) => {
                sandbox.set_status(SandboxStatus::Deleted);
                self.write_map().remove(id.as_str());
                warn!(sandbox = %id, error = %e, "sandbox creation rolled back");
                Err(e)
            }
        }
    }

    async fn provision(&self, sandbox: &Sandbox) -> Result<Resources> {
        let path = sandbox.workspace_path.clone();
        let workspace = blocking(path.clone(), move || Workspace::create(&path)).await?;

        let spec = ContainerSpec {
            name: sandbox.container_name.clone(),
            sandbox_id: sandbox.id.to_string(),
            image: self.image.clone(),
            workspace: workspace.root().to_path_buf(),
            tmpfs_size: self.tmpfs_size.clone(),
        };
        match ContainerHandle::create(Arc::clone(&self.runtime), &spec).await {
            Ok(container) => Ok(Resources {
                workspace,
                container,
            }),
            Err(e) => {
                let root = workspace.root().to_path_buf();
                if let Err(cleanup) = blocking(root, move || workspace.destroy()).await {
                    warn!(sandbox = %sandbox.id, error = %cleanup, "workspace rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Tear down a sandbox's container and workspace.
    ///
    /// Both teardown steps are always attempted and the entry is always
    /// removed; the first failure, if any, is returned afterwards.
    pub async fn delete_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = self.lookup(id)?;
        let mut slot = sandbox.resources.lock().await;
        if sandbox.status() != SandboxStatus::Active {
            return Err(SandboxError::SandboxNotFound(id.to_string()));
        }
        sandbox.set_status(SandboxStatus::Deleting);

        let mut first_error = None;
        if let Some(Resources {
            workspace,
            container,
        }) = slot.take()
        {
            if let Err(e) = container.destroy().await {
                warn!(sandbox = %id, error = %e, "container teardown failed");
                first_error.get_or_insert(e);
            }
            let root = workspace.root().to_path_buf();
            if let Err(e) = blocking(root, move || workspace.destroy()).await {
                warn!(sandbox = %id, error = %e, "workspace teardown failed");
                first_error.get_or_insert(e);
            }
        }

        sandbox.set_status(SandboxStatus::Deleted);
        self.write_map().remove(id);
        drop(slot);
        info!(sandbox = %id, "sandbox deleted");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lookup(&self, id: &str) -> Result<Arc<Sandbox>> {
        self.read_map()
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::SandboxNotFound(id.to_string()))
    }

    /// Look up an active sandbox.
    pub fn get(&self, id: &str) -> Result<Arc<Sandbox>> {
        let sandbox = self.lookup(id)?;
        if sandbox.status() != SandboxStatus::Active {
            return Err(SandboxError::SandboxNotFound(id.to_string()));
        }
        Ok(sandbox)
    }

    /// Ids of all active sandboxes, sorted.
    pub fn ids(&self) -> Vec<SandboxId> {
        let mut ids: Vec<SandboxId> = self
            .read_map()
            .values()
            .filter(|s| s.status() == SandboxStatus::Active)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ── File operations ─────────────────────────────────────────────

    /// List files in a sandbox's workspace, optionally below `dir`.
    pub async fn list_files(&self, id: &str, dir: Option<&str>) -> Result<Vec<String>> {
        let sandbox = self.get(id)?;
        let guard = sandbox.acquire().await?;
        let dir = dir.map(str::to_string);
        guard.with_workspace(move |ws| ws.list(dir.as_deref())).await
    }

    pub async fn read_file(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let sandbox = self.get(id)?;
        let guard = sandbox.acquire().await?;
        let path = path.to_string();
        guard.with_workspace(move |ws| ws.read(&path)).await
    }

    pub async fn write_file(&self, id: &str, path: &str, content: Vec<u8>) -> Result<()> {
        let sandbox = self.get(id)?;
        let guard = sandbox.acquire().await?;
        let path = path.to_string();
        guard
            .with_workspace(move |ws| ws.write(&path, &content))
            .await
    }

    pub async fn delete_file(&self, id: &str, path: &str) -> Result<()> {
        let sandbox = self.get(id)?;
        let guard = sandbox.acquire().await?;
        let path = path.to_string();
        guard.with_workspace(move |ws| ws.delete(&path)).await
    }

    // ── Housekeeping ────────────────────────────────────────────────

    /// Remove containers that carry this registry's prefix but belong to
    /// no registered sandbox (left over from an earlier process).
    ///
    /// Returns the names that were removed. Individual removal failures
    /// are logged and skipped.
    pub async fn reap_orphans(&self) -> Result<Vec<String>> {
        let found = self.runtime.list(&self.prefix).await?;
        let known: HashSet<String> = self
            .read_map()
            .values()
            .map(|s| s.container_name.clone())
            .collect();

        let mut reaped = Vec::new();
        for name in found.into_iter().filter(|n| !known.contains(n)) {
            match self.runtime.remove(&name).await {
                Ok(()) => {
                    info!(container = %name, "reaped orphan container");
                    reaped.push(name);
                }
                Err(e) => warn!(container = %name, error = %e, "failed to reap orphan container"),
            }
        }
        Ok(reaped)
    }

    /// Delete every registered sandbox. Returns how many were deleted
    /// cleanly.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SandboxId> = self.read_map().keys().cloned().collect();
        let mut deleted = 0;
        for id in ids {
            match self.delete_sandbox(id.as_str()).await {
                Ok(()) => deleted += 1,
                Err(SandboxError::SandboxNotFound(_)) => {}
                Err(e) => warn!(sandbox = %id, error = %e, "sandbox teardown failed during shutdown"),
            }
        }
        info!(deleted, "registry shut down");
        deleted
    }
}
