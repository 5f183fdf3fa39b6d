//! Service process: startup, API serving, and graceful shutdown.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use codebox_config::AppConfig;

use crate::api::{self, ApiState};
use crate::container::{ContainerRuntime, DockerRuntime};
use crate::execution::ExecutionEngine;
use crate::registry::SandboxRegistry;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The codebox service: registry, execution engine, and API server.
pub struct Daemon {
    config: AppConfig,
    registry: Arc<SandboxRegistry>,
    engine: Arc<ExecutionEngine>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Daemon {
    /// Create a daemon backed by the Docker CLI named in the config.
    pub fn new(config: AppConfig) -> Self {
        let runtime = Arc::new(DockerRuntime::new(&config.sandbox.docker_bin));
        Self::with_runtime(config, runtime)
    }

    /// Create a daemon over an arbitrary container runtime.
    pub fn with_runtime(config: AppConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let registry = Arc::new(SandboxRegistry::new(&config.sandbox, runtime));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&registry),
            config.sandbox.exec_timeout(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            engine,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, DaemonError> {
        let addr = format!(
            "{}:{}",
            self.config.server.listen_addr, self.config.server.listen_port
        );
        TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Startup(format!("failed to bind {addr}: {e}")))
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let listener = self.bind().await?;
        self.run_with_listener(listener).await
    }

    /// Serve on `listener` until a shutdown signal or Ctrl-C, then delete
    /// every sandbox.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), DaemonError> {
        let runtime = self.registry.runtime();
        info!(
            runtime = runtime.name(),
            root = %self.config.sandbox.root.display(),
            image = %self.config.sandbox.image,
            "codebox starting"
        );
        if !runtime.available().await {
            warn!(runtime = runtime.name(), "container runtime is not reachable");
        }

        if self.config.sandbox.reap_orphans_on_start {
            match self.registry.reap_orphans().await {
                Ok(reaped) if !reaped.is_empty() => {
                    info!(count = reaped.len(), "reaped orphan containers")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "orphan reaping failed"),
            }
        }

        let state = Arc::new(ApiState {
            registry: Arc::clone(&self.registry),
            engine: Arc::clone(&self.engine),
        });
        let mut server = std::pin::pin!(api::serve(listener, state, self.shutdown_tx.subscribe()));

        let result = tokio::select! {
            res = &mut server => res,
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                self.shutdown();
                server.await
            }
        };

        let deleted = self.registry.shutdown().await;
        info!(deleted, "codebox stopped");
        result.map_err(DaemonError::Io)
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

/// Errors from the service runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_creation_uses_config() {
        let mut config = AppConfig::default();
        config.sandbox.exec_timeout_secs = 7;
        let daemon = Daemon::new(config);

        assert_eq!(daemon.config().server.listen_port, 8000);
        assert_eq!(daemon.engine().timeout().as_secs(), 7);
        assert_eq!(daemon.registry().prefix(), "code-sandbox");
        assert_eq!(daemon.registry().runtime().name(), "docker");
        assert!(daemon.registry().ids().is_empty());
    }

    #[tokio::test]
    async fn test_daemon_shutdown_without_subscribers() {
        let daemon = Daemon::new(AppConfig::default());
        daemon.shutdown();
    }

    #[tokio::test]
    async fn test_bind_failure_is_startup_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = AppConfig::default();
        config.server.listen_port = taken.local_addr().unwrap().port();
        let daemon = Daemon::new(config);
        assert!(matches!(
            daemon.bind().await,
            Err(DaemonError::Startup(_))
        ));
    }
}
