//! API server: axum router over the sandbox registry and execution engine.
//!
//! Handlers are thin: they decode the request, make one core call, and map
//! the result (or the [`SandboxError`] kind) onto a JSON response.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::types::*;
use crate::daemon::ShutdownSignal;
use crate::error::{ErrorKind, SandboxError};
use crate::execution::{ExecutionEngine, ExecutionRequest};
use crate::registry::SandboxRegistry;

/// Shared state accessible to all route handlers.
pub struct ApiState {
    pub registry: Arc<SandboxRegistry>,
    pub engine: Arc<ExecutionEngine>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the axum router with all API routes.
pub fn router(state: Arc<ApiState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/doc", get(handle_doc))
        .route(
            "/api/sandboxes",
            get(handle_list_sandboxes).post(handle_create_sandbox),
        )
        .route("/api/sandboxes/{id}", axum::routing::delete(handle_delete_sandbox))
        .route(
            "/api/sandboxes/{id}/files",
            get(handle_list_files).post(handle_upsert_file),
        )
        .route(
            "/api/sandboxes/{id}/files/{*path}",
            get(handle_read_file).delete(handle_delete_file),
        )
        .route("/api/sandboxes/{id}/execute", post(handle_execute))
        .with_state(state)
}

/// Serve the API on `listener` until the shutdown signal is received.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("API server shutting down");
        })
        .await
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ExecutionTimeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Container | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn to_api_error(err: SandboxError) -> ApiError {
    let kind = err.kind();
    debug!(kind = kind.as_str(), error = %err, "request failed");
    (
        status_for(kind),
        Json(ErrorResponse {
            error: err.to_string(),
            kind: kind.as_str().to_string(),
        }),
    )
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(to_api_error(SandboxError::Validation(
            rejection.body_text(),
        ))),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
    })
}

async fn handle_doc() -> Json<DocResponse> {
    let endpoint = |method: &str, path: &str, description: &str| EndpointDoc {
        method: method.to_string(),
        path: path.to_string(),
        description: description.to_string(),
    };
    Json(DocResponse {
        service: "codebox".to_string(),
        language: "python".to_string(),
        endpoints: vec![
            endpoint("GET", "/api/sandboxes", "List active sandbox ids"),
            endpoint(
                "POST",
                "/api/sandboxes",
                "Create a sandbox (workspace directory + container)",
            ),
            endpoint(
                "DELETE",
                "/api/sandboxes/{id}",
                "Remove a sandbox (container + workspace directory)",
            ),
            endpoint(
                "GET",
                "/api/sandboxes/{id}/files?dir=/",
                "List files in the sandbox workspace",
            ),
            endpoint(
                "POST",
                "/api/sandboxes/{id}/files",
                "Create or update a file: {\"path\", \"content\"}",
            ),
            endpoint(
                "GET",
                "/api/sandboxes/{id}/files/{path}",
                "Read a file from the sandbox workspace",
            ),
            endpoint(
                "DELETE",
                "/api/sandboxes/{id}/files/{path}",
                "Delete a file from the sandbox workspace",
            ),
            endpoint(
                "POST",
                "/api/sandboxes/{id}/execute",
                "Run a .py file: {\"path\": \"main.py\", \"args\": []}; 408 on timeout",
            ),
        ],
    })
}

async fn handle_list_sandboxes(State(state): State<Arc<ApiState>>) -> Json<SandboxesResponse> {
    let sandboxes = state
        .registry
        .ids()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    Json(SandboxesResponse { sandboxes })
}

async fn handle_create_sandbox(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<CreateSandboxResponse> {
    let id = state.registry.create_sandbox().await.map_err(to_api_error)?;
    Ok(Json(CreateSandboxResponse { id: id.to_string() }))
}

async fn handle_delete_sandbox(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<OkResponse> {
    state
        .registry
        .delete_sandbox(&id)
        .await
        .map_err(to_api_error)?;
    Ok(Json(OkResponse::ok()))
}

async fn handle_list_files(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<ListFilesResponse> {
    let files = state
        .registry
        .list_files(&id, query.dir.as_deref())
        .await
        .map_err(to_api_error)?;
    Ok(Json(ListFilesResponse { files }))
}

async fn handle_upsert_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Result<Json<FileContent>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = json_body(body)?;
    state
        .registry
        .write_file(&id, &req.path, req.content.into_bytes())
        .await
        .map_err(to_api_error)?;
    Ok(Json(OkResponse::ok()))
}

async fn handle_read_file(
    State(state): State<Arc<ApiState>>,
    Path((id, path)): Path<(String, String)>,
) -> ApiResult<FileContent> {
    let content = state
        .registry
        .read_file(&id, &path)
        .await
        .map_err(to_api_error)?;
    Ok(Json(FileContent {
        path,
        content: lossy(&content),
    }))
}

async fn handle_delete_file(
    State(state): State<Arc<ApiState>>,
    Path((id, path)): Path<(String, String)>,
) -> ApiResult<OkResponse> {
    state
        .registry
        .delete_file(&id, &path)
        .await
        .map_err(to_api_error)?;
    Ok(Json(OkResponse::ok()))
}

async fn handle_execute(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<ExecuteResponse> {
    let req = json_body(body)?;
    let request = ExecutionRequest::new(req.path).with_args(req.args);
    let result = state
        .engine
        .execute(&id, &request)
        .await
        .map_err(to_api_error)?;
    Ok(Json(ExecuteResponse {
        exit_code: result.exit_code,
        stdout: lossy(&result.stdout),
        stderr: lossy(&result.stderr),
        elapsed_ms: result.elapsed.as_millis() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_distinct_for_client_errors() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::ExecutionTimeout),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_for(ErrorKind::Container),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let Json(health) = handle_health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, crate::build_info::VERSION);
    }

    #[tokio::test]
    async fn test_doc_lists_execute_endpoint() {
        let Json(doc) = handle_doc().await;
        assert_eq!(doc.language, "python");
        assert!(
            doc.endpoints
                .iter()
                .any(|e| e.method == "POST" && e.path == "/api/sandboxes/{id}/execute")
        );
    }

    #[test]
    fn test_error_body_carries_kind() {
        let (status, Json(body)) =
            to_api_error(SandboxError::SandboxNotFound("abc".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.kind, "not_found");
        assert!(body.error.contains("abc"));
    }
}
