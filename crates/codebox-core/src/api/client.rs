//! API client: typed access to a running codebox server over HTTP.

use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::*;

/// Errors from the API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("server returned {status} ({kind}): {message}")]
    Server {
        status: u16,
        kind: String,
        message: String,
    },
}

impl ApiClientError {
    /// Error class reported by the server, if the server answered.
    pub fn server_kind(&self) -> Option<&str> {
        match self {
            ApiClientError::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Client for the codebox HTTP API.
pub struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:8000`).
    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let base = Url::parse(base_url).map_err(|e| ApiClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build a URL from path segments; each segment is percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn sandbox_url(&self, id: &str, rest: &[&str]) -> Url {
        self.url(["api", "sandboxes", id].into_iter().chain(rest.iter().copied()))
    }

    fn file_url(&self, id: &str, path: &str) -> Url {
        let mut segments = vec!["files"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        self.sandbox_url(id, &segments)
    }

    async fn request<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, ApiClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%method, %url, "API request");
        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiClientError::Request(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiClientError::Request(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let (kind, message) = match serde_json::from_slice::<ErrorResponse>(&bytes) {
                Ok(err) => (err.kind, err.error),
                Err(_) => (
                    "unknown".to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ),
            };
            return Err(ApiClientError::Server {
                status: status.as_u16(),
                kind,
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| ApiClientError::Parse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiClientError> {
        self.request::<(), T>(Method::GET, url, None).await
    }

    // ── Typed API methods ──────────────────────────────────────────────

    pub async fn health(&self) -> Result<HealthResponse, ApiClientError> {
        self.get(self.url(["health"])).await
    }

    pub async fn list_sandboxes(&self) -> Result<Vec<String>, ApiClientError> {
        let resp: SandboxesResponse = self.get(self.url(["api", "sandboxes"])).await?;
        Ok(resp.sandboxes)
    }

    /// Create a sandbox and return its id.
    pub async fn create_sandbox(&self) -> Result<String, ApiClientError> {
        let resp: CreateSandboxResponse = self
            .request::<(), _>(Method::POST, self.url(["api", "sandboxes"]), None)
            .await?;
        Ok(resp.id)
    }

    pub async fn delete_sandbox(&self, id: &str) -> Result<(), ApiClientError> {
        let _: OkResponse = self
            .request::<(), _>(Method::DELETE, self.sandbox_url(id, &[]), None)
            .await?;
        Ok(())
    }

    /// List workspace files, optionally below `dir`.
    pub async fn list_files(&self, id: &str, dir: Option<&str>) -> Result<Vec<String>, ApiClientError> {
        let mut url = self.sandbox_url(id, &["files"]);
        if let Some(dir) = dir {
            url.query_pairs_mut().append_pair("dir", dir);
        }
        let resp: ListFilesResponse = self.get(url).await?;
        Ok(resp.files)
    }

    pub async fn write_file(&self, id: &str, path: &str, content: &str) -> Result<(), ApiClientError> {
        let body = FileContent {
            path: path.to_string(),
            content: content.to_string(),
        };
        let _: OkResponse = self
            .request(Method::POST, self.sandbox_url(id, &["files"]), Some(&body))
            .await?;
        Ok(())
    }

    pub async fn read_file(&self, id: &str, path: &str) -> Result<String, ApiClientError> {
        let resp: FileContent = self.get(self.file_url(id, path)).await?;
        Ok(resp.content)
    }

    pub async fn delete_file(&self, id: &str, path: &str) -> Result<(), ApiClientError> {
        let _: OkResponse = self
            .request::<(), _>(Method::DELETE, self.file_url(id, path), None)
            .await?;
        Ok(())
    }

    /// Run a `.py` file inside a sandbox.
    pub async fn execute(
        &self,
        id: &str,
        path: &str,
        args: &[String],
    ) -> Result<ExecuteResponse, ApiClientError> {
        let body = ExecuteRequest {
            path: path.to_string(),
            args: args.to_vec(),
        };
        self.request(Method::POST, self.sandbox_url(id, &["execute"]), Some(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ApiClientError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ApiClient::new("mailto:someone@example.com"),
            Err(ApiClientError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_url_building() {
        let client = ApiClient::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(
            client.sandbox_url("abc", &["execute"]).as_str(),
            "http://127.0.0.1:8000/api/sandboxes/abc/execute"
        );
        assert_eq!(
            client.file_url("abc", "src/my file.py").as_str(),
            "http://127.0.0.1:8000/api/sandboxes/abc/files/src/my%20file.py"
        );
    }

    #[test]
    fn test_url_building_under_path_prefix() {
        let client = ApiClient::new("http://host/codebox").unwrap();
        assert_eq!(
            client.url(["health"]).as_str(),
            "http://host/codebox/health"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ApiClient::new(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(matches!(
            client.health().await,
            Err(ApiClientError::Request(_))
        ));
    }

    #[test]
    fn test_server_kind() {
        let err = ApiClientError::Server {
            status: 404,
            kind: "not_found".to_string(),
            message: "sandbox not found: x".to_string(),
        };
        assert_eq!(err.server_kind(), Some("not_found"));
        assert_eq!(ApiClientError::Parse("x".to_string()).server_kind(), None);
    }
}
