//! HTTP surface of the gateway.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /` - Server info
//! - `POST /sandboxes`, `GET /sandboxes`, `GET|DELETE /sandboxes/:id`
//! - `POST /sandboxes/:id/exec`, `POST /sandboxes/:id/stop`
//! - `POST /dev-server/start`, `POST /dev-server/stop`, `GET /dev-server/status`
//! - `ANY /dev-server/proxy/:port/*path` - Reverse proxy

use crate::error::{GatewayError, Result};
use crate::proxy::{self, ProxyRequest};
use crate::state::AppState;
use crate::types::{
    CreateSandboxRequest, CreateSandboxResponse, DevServerSelector, DevServerStartRequest,
    DevServerStartResponse, DevServerStopResponse, ExecRequest, LifecycleResponse,
    ListSandboxesResponse, SandboxInfo,
};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, OriginalUri, Path, Query, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use axum::Router;
use openswe_core::devserver::{DevServerStatus, LaunchRequest};
use openswe_core::{Sandbox, SandboxId, SandboxOptions};
use openswe_exec::{ExecOptions, ExecResult};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(state: AppState) -> Router {
    tracing::debug!("Building HTTP router");

    let body_limit = state.config().max_body_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        // Sandbox lifecycle
        .route("/sandboxes", post(create_sandbox).get(list_sandboxes))
        .route("/sandboxes/:id", get(get_sandbox).delete(delete_sandbox))
        .route("/sandboxes/:id/exec", post(exec_in_sandbox))
        .route("/sandboxes/:id/stop", post(stop_sandbox))
        // Dev server
        .route("/dev-server/start", post(start_dev_server))
        .route("/dev-server/stop", post(stop_dev_server))
        .route("/dev-server/status", get(dev_server_status))
        .route("/dev-server/proxy/:port", any(proxy_root))
        .route("/dev-server/proxy/:port/", any(proxy_root))
        .route("/dev-server/proxy/:port/*path", any(proxy_path))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "openswe-gateway",
        "sandboxes": state.manager().count().await,
    }))
}

/// Root endpoint with server info.
async fn root_handler() -> impl IntoResponse {
    tracing::trace!("Root page request");
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>OpenSWE Gateway</title>
    <style>
        body { font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }
        code { background: #f4f4f4; padding: 2px 6px; border-radius: 3px; }
        pre { background: #f4f4f4; padding: 16px; border-radius: 6px; overflow-x: auto; }
    </style>
</head>
<body>
    <h1>OpenSWE Gateway</h1>
    <p>Sandboxed command execution and dev-server previews.</p>

    <h2>Sandboxes</h2>
    <ul>
        <li><code>POST /sandboxes</code> - Create a sandbox</li>
        <li><code>GET /sandboxes</code> - List sandboxes</li>
        <li><code>GET /sandboxes/:id</code> - Sandbox metadata</li>
        <li><code>POST /sandboxes/:id/exec</code> - Run a command</li>
        <li><code>POST /sandboxes/:id/stop</code> - Stop a sandbox</li>
        <li><code>DELETE /sandboxes/:id</code> - Delete a sandbox</li>
    </ul>

    <h2>Dev Server</h2>
    <ul>
        <li><code>POST /dev-server/start</code> - Detect and start a dev server</li>
        <li><code>POST /dev-server/stop</code> - Stop it</li>
        <li><code>GET /dev-server/status</code> - Process and log status</li>
        <li><code>/dev-server/proxy/:port/</code> - Preview through the proxy</li>
    </ul>

    <h2>Example</h2>
    <pre>curl -X POST http://localhost:8080/sandboxes/$ID/exec \
  -H "Content-Type: application/json" \
  -d '{"kind":"shell","command":"npm install"}'</pre>
</body>
</html>"#,
    )
}

/// Look up a sandbox, mapping unknown or malformed IDs to 404.
async fn find_sandbox(state: &AppState, id: &str) -> Result<Arc<Sandbox>> {
    state
        .sandbox(id)
        .await
        .ok_or_else(|| GatewayError::NotFound(id.to_string()))
}

fn parse_id(id: &str) -> Result<SandboxId> {
    id.trim()
        .parse()
        .map_err(|_| GatewayError::NotFound(id.to_string()))
}

// ============================================================================
// Sandbox Lifecycle
// ============================================================================

async fn create_sandbox(
    State(state): State<AppState>,
    Json(req): Json<CreateSandboxRequest>,
) -> Result<Json<CreateSandboxResponse>> {
    tracing::info!(?req, "Creating sandbox");

    let image = req
        .image
        .clone()
        .unwrap_or_else(|| state.config().default_image.clone());
    let options = SandboxOptions {
        host_repo_path: req.host_repo_path,
        workspace_path: req
            .workspace_path
            .or_else(|| Some(state.config().workspace_path.clone())),
        repo_name: req.repo_name,
        container_repo_path: req.container_repo_path,
        commit_on_change: req.commit_on_change.unwrap_or(false),
        command_timeout: req.command_timeout_sec.map(Duration::from_secs),
        resources: None,
    };

    let sandbox = state.manager().create(&image, options).await?;
    tracing::info!(sandbox_id = %sandbox.id(), "Created sandbox");

    Ok(Json(CreateSandboxResponse {
        sandbox_id: sandbox.id().to_string(),
        metadata: sandbox.metadata().clone(),
    }))
}

async fn list_sandboxes(State(state): State<AppState>) -> Json<ListSandboxesResponse> {
    tracing::debug!("Listing sandboxes");

    let sandboxes = state
        .manager()
        .list()
        .await
        .into_iter()
        .map(|s| SandboxInfo {
            sandbox_id: s.id().to_string(),
            state: s.state(),
            metadata: s.metadata().clone(),
        })
        .collect();

    Json(ListSandboxesResponse { sandboxes })
}

async fn get_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SandboxInfo>> {
    let sandbox = find_sandbox(&state, &id).await?;
    Ok(Json(SandboxInfo {
        sandbox_id: sandbox.id().to_string(),
        state: sandbox.state(),
        metadata: sandbox.metadata().clone(),
    }))
}

async fn exec_in_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> Result<Json<ExecResult>> {
    let sandbox = find_sandbox(&state, &id).await?;
    req.command.validate()?;

    let mut opts = ExecOptions::new().envs(req.env);
    if let Some(cwd) = req.cwd {
        opts = opts.cwd(cwd);
    }
    if let Some(secs) = req.timeout_sec.filter(|s| *s > 0) {
        opts = opts.timeout(Duration::from_secs(secs));
    }

    let command = req.command.to_shell_command();
    let result = sandbox.exec(&command, opts).await?;
    tracing::info!(
        sandbox_id = %sandbox.id(),
        exit_code = result.exit_code,
        "Command finished"
    );
    Ok(Json(result))
}

async fn stop_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>> {
    let sandbox_id = parse_id(&id)?;
    if !state.manager().stop(sandbox_id).await? {
        return Err(GatewayError::NotFound(id));
    }
    Ok(Json(LifecycleResponse { success: true }))
}

async fn delete_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>> {
    let sandbox_id = parse_id(&id)?;
    if !state.manager().delete(sandbox_id).await? {
        return Err(GatewayError::NotFound(id));
    }
    tracing::info!(sandbox_id = %sandbox_id, "Deleted sandbox");
    Ok(Json(LifecycleResponse { success: true }))
}

// ============================================================================
// Dev Server
// ============================================================================

async fn start_dev_server(
    State(state): State<AppState>,
    Json(req): Json<DevServerStartRequest>,
) -> Result<Json<DevServerStartResponse>> {
    tracing::info!(session = ?req.sandbox_session_id, port = ?req.port, "Starting dev server");

    let target = state
        .dev_server_target(req.sandbox_session_id.as_deref())
        .await?;
    let outcome = state
        .launcher()
        .start(
            target.as_ref(),
            LaunchRequest {
                command: req.command,
                port: req.port,
                workdir: req.workdir,
            },
        )
        .await?;

    Ok(Json(outcome.into()))
}

async fn stop_dev_server(
    State(state): State<AppState>,
    body: Option<Json<DevServerSelector>>,
) -> Result<Json<DevServerStopResponse>> {
    let selector = body.map(|Json(s)| s).unwrap_or_default();
    let target = state
        .dev_server_target(selector.sandbox_session_id.as_deref())
        .await?;

    let stopped = state
        .launcher()
        .stop(target.as_ref(), selector.workdir.as_deref())
        .await?;

    Ok(Json(DevServerStopResponse {
        success: true,
        stopped,
        message: if stopped {
            "Dev server stopped".into()
        } else {
            "No running dev server".into()
        },
    }))
}

async fn dev_server_status(
    State(state): State<AppState>,
    Query(selector): Query<DevServerSelector>,
) -> Result<Json<DevServerStatus>> {
    let target = state
        .dev_server_target(selector.sandbox_session_id.as_deref())
        .await?;
    let status = state
        .launcher()
        .status(target.as_ref(), selector.workdir.as_deref())
        .await?;
    Ok(Json(status))
}

// ============================================================================
// Reverse Proxy
// ============================================================================

async fn proxy_root(
    State(state): State<AppState>,
    Path(port): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    proxy::forward(
        &state,
        ProxyRequest {
            port,
            path: String::new(),
            query,
            method,
            headers,
            body,
        },
    )
    .await
}

// The wildcard parameter arrives percent-decoded, so the path is re-read
// from the original URI.
async fn proxy_path(
    State(state): State<AppState>,
    Path((port, _)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    proxy::forward(
        &state,
        ProxyRequest {
            port,
            path: proxy::upstream_path(uri.path()).to_string(),
            query,
            method,
            headers,
            body,
        },
    )
    .await
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = build_router(state);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
