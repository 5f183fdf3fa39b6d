//! HTTP/JSON API over the sandbox core.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐        HTTP + JSON         ┌──────────────┐
//! │  agent   │───────────────────────────▶│  API server  │
//! │   CLI    │                            │   (axum)     │
//! └──────────┘                            └──────┬───────┘
//!                                                │
//!                              ┌─────────────────┴──────────────┐
//!                              ▼                                ▼
//!                      ┌───────────────┐               ┌─────────────────┐
//!                      │SandboxRegistry│◀──────────────│ExecutionEngine  │
//!                      └───────────────┘               └─────────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{ApiClient, ApiClientError};
pub use server::{ApiState, router, serve};
pub use types::*;
