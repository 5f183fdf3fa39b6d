//! Configuration builders for tests.

use std::path::Path;

use codebox_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .sandbox_root(tmp.path())
///     .exec_timeout_secs(1)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.server.listen_addr = addr.to_string();
        self
    }

    pub fn sandbox_root(mut self, root: &Path) -> Self {
        self.config.sandbox.root = root.to_path_buf();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.config.sandbox.image = image.to_string();
        self
    }

    pub fn container_prefix(mut self, prefix: &str) -> Self {
        self.config.sandbox.container_prefix = prefix.to_string();
        self
    }

    pub fn exec_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sandbox.exec_timeout_secs = secs;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
