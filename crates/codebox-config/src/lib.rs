#![deny(unsafe_code)]

//! Configuration loading, validation, and environment overrides for codebox.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure. Deployment
//! environments can override the sandbox settings with `SANDBOX_*`
//! variables (see [`AppConfig::apply_env`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`SandboxSettings::root`].
pub const ENV_SANDBOX_ROOT: &str = "SANDBOX_ROOT";
/// Environment variable overriding [`SandboxSettings::image`].
pub const ENV_SANDBOX_IMAGE: &str = "SANDBOX_PYTHON_IMAGE";
/// Environment variable overriding [`SandboxSettings::container_prefix`].
pub const ENV_CONTAINER_PREFIX: &str = "SANDBOX_CONTAINER_PREFIX";
/// Environment variable overriding [`SandboxSettings::exec_timeout_secs`].
pub const ENV_EXEC_TIMEOUT_SECS: &str = "SANDBOX_EXEC_TIMEOUT_SECS";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for environment variable {var}")]
    Env { var: &'static str, value: String },

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Sandbox provisioning configuration.
    #[serde(default)]
    pub sandbox: SandboxSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the API server binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

/// Sandbox provisioning configuration.
///
/// The container security profile is fixed and deliberately absent from
/// this section: only the image, naming, storage location, and the
/// execution deadline are deployment choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Directory holding one workspace directory per sandbox.
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,

    /// Container image used for sandbox runtimes.
    #[serde(default = "default_sandbox_image")]
    pub image: String,

    /// Prefix of every container name (`<prefix>-<sandbox id>`).
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Docker CLI binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: PathBuf,

    /// Wall-clock limit for a single execution, in seconds.
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    /// Size of the `/tmp` tmpfs inside each container (Docker size syntax).
    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size: String,

    /// Remove prefixed containers unknown to the registry at startup.
    #[serde(default = "default_reap_orphans_on_start")]
    pub reap_orphans_on_start: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            image: default_sandbox_image(),
            container_prefix: default_container_prefix(),
            docker_bin: default_docker_bin(),
            exec_timeout_secs: default_exec_timeout_secs(),
            tmpfs_size: default_tmpfs_size(),
            reap_orphans_on_start: default_reap_orphans_on_start(),
        }
    }
}

impl SandboxSettings {
    /// The execution deadline as a [`Duration`].
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("sandboxes")
}

fn default_sandbox_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_container_prefix() -> String {
    "code-sandbox".to_string()
}

fn default_docker_bin() -> PathBuf {
    PathBuf::from("docker")
}

fn default_exec_timeout_secs() -> u64 {
    30
}

fn default_tmpfs_size() -> String {
    "256m".to_string()
}

fn default_reap_orphans_on_start() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Read and parse a TOML config file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&tokio::fs::read_to_string(path).await?)
    }

    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SANDBOX_*` overrides read through `lookup`, then re-validate.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_SANDBOX_ROOT) {
            tracing::debug!(root = %root, "sandbox root overridden from environment");
            self.sandbox.root = PathBuf::from(root);
        }
        if let Some(image) = lookup(ENV_SANDBOX_IMAGE) {
            self.sandbox.image = image;
        }
        if let Some(prefix) = lookup(ENV_CONTAINER_PREFIX) {
            self.sandbox.container_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_EXEC_TIMEOUT_SECS) {
            self.sandbox.exec_timeout_secs =
                raw.trim().parse().map_err(|_| ConfigError::Env {
                    var: ENV_EXEC_TIMEOUT_SECS,
                    value: raw.clone(),
                })?;
        }
        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_port == 0 {
            return Err(ConfigError::Validation(
                "server.listen_port must be non-zero".to_string(),
            ));
        }
        if self.server.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "server.listen_addr must not be empty".to_string(),
            ));
        }

        let sandbox = &self.sandbox;
        if sandbox.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "sandbox.root must not be empty".to_string(),
            ));
        }
        if sandbox.image.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sandbox.image must not be empty".to_string(),
            ));
        }
        // The prefix ends up in container names and name filters.
        let prefix_ok = !sandbox.container_prefix.is_empty()
            && sandbox
                .container_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !prefix_ok {
            return Err(ConfigError::Validation(format!(
                "sandbox.container_prefix must be non-empty and use only [a-zA-Z0-9_.-], got {:?}",
                sandbox.container_prefix
            )));
        }
        if sandbox.exec_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sandbox.exec_timeout_secs must be at least 1".to_string(),
            ));
        }
        if sandbox.tmpfs_size.is_empty() {
            return Err(ConfigError::Validation(
                "sandbox.tmpfs_size must not be empty".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
