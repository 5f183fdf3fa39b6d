//! Registry fixture over a temporary sandbox root and a [`FakeRuntime`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use codebox_config::SandboxSettings;
use codebox_core::{ExecutionEngine, SandboxRegistry};
use tempfile::TempDir;

use crate::fake_runtime::FakeRuntime;

/// A registry and engine whose workspaces live in a temp directory that is
/// removed when the fixture is dropped.
pub struct TestSandboxes {
    pub registry: Arc<SandboxRegistry>,
    pub engine: Arc<ExecutionEngine>,
    pub runtime: FakeRuntime,
    pub settings: SandboxSettings,
    _temp_dir: TempDir,
}

impl TestSandboxes {
    /// Fixture with the default 30 s execution timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let settings = SandboxSettings {
            root: temp_dir.path().join("sandboxes"),
            ..SandboxSettings::default()
        };
        let runtime = FakeRuntime::new();
        let registry = Arc::new(SandboxRegistry::new(&settings, Arc::new(runtime.clone())));
        let engine = Arc::new(ExecutionEngine::new(Arc::clone(&registry), timeout));
        Self {
            registry,
            engine,
            runtime,
            settings,
            _temp_dir: temp_dir,
        }
    }

    /// Directory holding every workspace.
    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Host directory of sandbox `id`.
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.settings.root.join(id)
    }

    /// Container name of sandbox `id`.
    pub fn container_name(&self, id: &str) -> String {
        format!("{}-{id}", self.settings.container_prefix)
    }
}

impl Default for TestSandboxes {
    fn default() -> Self {
        Self::new()
    }
}
