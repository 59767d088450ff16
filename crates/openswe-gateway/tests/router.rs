//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use openswe_gateway::{http::build_router, AppState, GatewayConfig, ProviderKind};
use serde_json::Value;
use tower::ServiceExt;

fn local_state(workspace: &std::path::Path) -> AppState {
    AppState::new(GatewayConfig {
        provider: ProviderKind::Local,
        workspace_path: workspace.to_path_buf(),
        ..GatewayConfig::default()
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sandboxes"], 0);
}

#[tokio::test]
async fn test_unknown_sandbox_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    let uri = format!("/sandboxes/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&router, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = send(&router, get("/sandboxes/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_proxy_port_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    for uri in [
        "/dev-server/proxy/0/",
        "/dev-server/proxy/65536/app.js",
        "/dev-server/proxy/abc",
    ] {
        let (status, body) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].as_str().unwrap().contains("invalid port"));
    }
}

#[tokio::test]
async fn test_refused_connection_is_503_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (status, body) = send(&router, get(&format!("/dev-server/proxy/{port}/"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["hint"].as_str().unwrap().contains("Start your dev server"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_sandbox_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    let (status, body) = send(
        &router,
        post_json("/sandboxes", serde_json::json!({"repoName": "app"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let id = body["sandboxId"].as_str().unwrap().to_string();
    assert_eq!(body["metadata"]["provider"], "local");
    assert!(dir.path().join("app").is_dir());

    let (status, body) = send(
        &router,
        post_json(
            &format!("/sandboxes/{id}/exec"),
            serde_json::json!({"kind": "shell", "command": "echo hi > out.txt && cat out.txt"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["stdout"].as_str().unwrap().trim(), "hi");
    assert!(dir.path().join("app/out.txt").exists());

    let (status, body) = send(
        &router,
        post_json(
            &format!("/sandboxes/{id}/exec"),
            serde_json::json!({"kind": "shell", "command": "   "}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("must not be empty"));

    let (status, body) = send(&router, get("/sandboxes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandboxes"].as_array().unwrap().len(), 1);
    assert_eq!(body["sandboxes"][0]["state"], "running");

    let (status, _) = send(&router, post_json(&format!("/sandboxes/{id}/stop"), serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&router, get(&format!("/sandboxes/{id}"))).await;
    assert_eq!(body["state"], "stopped");

    let delete = |id: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/sandboxes/{id}"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, body) = send(&router, delete(&id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let (status, _) = send(&router, delete(&id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dev_server_start_without_project() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));

    let (status, body) = send(&router, post_json("/dev-server/start", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["state"], "not_started");

    let (status, body) = send(&router, get("/dev-server/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);

    let request = Request::builder()
        .method("POST")
        .uri("/dev-server/stop")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], false);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dev_server_unknown_session_is_404_and_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(local_state(dir.path()));
    let marker = dir.path().join("HOST_MARKER");

    let (status, body) = send(
        &router,
        post_json(
            "/dev-server/start",
            serde_json::json!({
                "sandboxSessionId": "no-such-sandbox",
                "command": format!("touch {}; sleep 30", marker.display()),
                "port": 4173,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("no-such-sandbox"));
    assert!(!marker.exists());

    let stale = uuid::Uuid::new_v4();
    let (status, _) = send(
        &router,
        post_json(
            "/dev-server/start",
            serde_json::json!({"sandboxSessionId": stale.to_string(), "command": "true"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        post_json(
            "/dev-server/stop",
            serde_json::json!({"sandboxSessionId": "no-such-sandbox"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        get("/dev-server/status?sandboxSessionId=no-such-sandbox"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
