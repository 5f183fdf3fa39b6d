//! A running [`Daemon`] on an ephemeral port, backed by a [`FakeRuntime`].

use std::sync::Arc;
use std::time::Duration;

use codebox_config::AppConfig;
use codebox_core::api::ApiClient;
use codebox_core::{Daemon, DaemonError};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;
use crate::fake_runtime::FakeRuntime;

/// A test-scoped daemon serving on `127.0.0.1:<random port>`.
///
/// The sandbox root lives in an owned temp directory that is deleted when
/// this value is dropped.
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    pub runtime: FakeRuntime,
    pub base_url: String,
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with default settings.
    pub async fn start() -> Self {
        Self::start_with(|builder| builder).await
    }

    /// Start a daemon after customising its config.
    pub async fn start_with(
        configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config: AppConfig = configure(
            TestConfigBuilder::new()
                .listen_addr("127.0.0.1")
                .sandbox_root(&temp_dir.path().join("sandboxes")),
        )
        .build();

        let runtime = FakeRuntime::new();
        let daemon = Arc::new(Daemon::with_runtime(config, Arc::new(runtime.clone())));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no address");

        let server = Arc::clone(&daemon);
        let handle = tokio::spawn(async move { server.run_with_listener(listener).await });

        Self {
            daemon,
            runtime,
            base_url: format!("http://{addr}"),
            handle: Some(handle),
            _temp_dir: temp_dir,
        }
    }

    /// Client pointed at this daemon.
    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.base_url).expect("test base URL is valid")
    }

    /// Signal shutdown and wait for the daemon to finish.
    pub async fn stop(mut self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        match self.handle.take() {
            Some(handle) => tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("daemon did not stop in time")
                .expect("daemon task panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
