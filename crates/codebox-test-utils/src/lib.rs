#![deny(unsafe_code)]

//! Shared test utilities for the codebox workspace.
//!
//! Provides an in-memory [`FakeRuntime`](fake_runtime::FakeRuntime) standing
//! in for Docker, registry and daemon fixtures over temporary directories,
//! config builders, and tracing helpers.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! codebox-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod fake_runtime;
pub mod sandboxes;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use fake_runtime::{ExecCall, FakeRuntime};
pub use sandboxes::TestSandboxes;
pub use tracing_setup::init_test_tracing;
