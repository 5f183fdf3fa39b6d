//! Request/response types for the HTTP API.
//!
//! Shared by the server and [`ApiClient`](super::ApiClient). File contents
//! and program output travel as UTF-8 strings; invalid bytes are replaced.

use serde::{Deserialize, Serialize};

/// Script executed when a request names none.
pub const DEFAULT_EXEC_PATH: &str = "main.py";

fn default_exec_path() -> String {
    DEFAULT_EXEC_PATH.to_string()
}

/// Service health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSandboxResponse {
    pub id: String,
}

/// Acknowledgement for operations with no other result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxesResponse {
    pub sandboxes: Vec<String>,
}

/// Query string of the file listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilesQuery {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<String>,
}

/// A file with its content, used both to upload and to return files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Execution request body. Both fields are optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default = "default_exec_path")]
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ExecuteRequest {
    fn default() -> Self {
        Self {
            path: default_exec_path(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// One entry of the `/doc` catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDoc {
    pub method: String,
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocResponse {
    pub service: String,
    pub language: String,
    pub endpoints: Vec<EndpointDoc>,
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable error class, e.g. `not_found` or `execution_timeout`.
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_defaults() {
        let req: ExecuteRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.path, "main.py");
        assert!(req.args.is_empty());

        let req: ExecuteRequest =
            serde_json::from_str(r#"{"path": "app.py", "args": ["--n", "3"]}"#).unwrap();
        assert_eq!(req.path, "app.py");
        assert_eq!(req.args, ["--n", "3"]);
    }

    #[test]
    fn test_list_query_dir_is_optional() {
        let q: ListFilesQuery = serde_json::from_str("{}").unwrap();
        assert!(q.dir.is_none());
    }
}
