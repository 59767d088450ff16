//! Reverse proxy tests against an in-process upstream server.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::Router;
use openswe_gateway::{http::build_router, AppState, GatewayConfig, ProviderKind};
use tower::ServiceExt;

const PAGE: &str = "<html><head><title>app</title></head><body>\
<img src=\"/logo.png\"><script>fetch('/api/x')</script></body></html>";

/// Start an upstream app on an ephemeral port and return the port.
async fn spawn_upstream() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let app = Router::new()
        .route(
            "/",
            get(|| async { ([(header::X_FRAME_OPTIONS, "DENY")], Html(PAGE)) }),
        )
        .route(
            "/login",
            get(move || async move { Redirect::temporary(&format!("http://localhost:{port}/next")) }),
        )
        .route(
            "/elsewhere",
            get(|| async { Redirect::temporary("https://example.com/next") }),
        )
        .route(
            "/data.json",
            get(|uri: axum::http::Uri| async move {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    format!("{{\"query\":\"{}\"}}", uri.query().unwrap_or("")),
                )
                    .into_response()
            }),
        )
        .route("/echo", post(|body: String| async move { body }))
        .route(
            "/files/*rest",
            get(|uri: axum::http::Uri| async move {
                format!("{}|{}", uri.path(), uri.query().unwrap_or(""))
            }),
        );

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    port
}

fn gateway() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(GatewayConfig {
        provider: ProviderKind::Local,
        workspace_path: dir.path().to_path_buf(),
        ..GatewayConfig::default()
    });
    (build_router(state), dir)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_html_is_rewritten_and_frame_header_stripped() {
    let port = spawn_upstream().await;
    let (router, _dir) = gateway();

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/dev-server/proxy/{port}/"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::X_FRAME_OPTIONS).is_none());
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let html = body_text(response).await;
    let prefix = format!("/dev-server/proxy/{port}");
    assert!(html.contains(&format!("<head><base href=\"{prefix}/\">")));
    assert!(html.contains(&format!("fetch('{prefix}/api/x')")));
    assert!(html.contains(&format!("src=\"{prefix}/logo.png\"")));
    assert!(html.contains("data-openswe-proxy"));
}

#[tokio::test]
async fn test_same_port_redirect_stays_in_proxy() {
    let port = spawn_upstream().await;
    let (router, _dir) = gateway();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/dev-server/proxy/{port}/login"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        format!("/dev-server/proxy/{port}/next").as_str()
    );

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/dev-server/proxy/{port}/elsewhere"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/next"
    );
}

#[tokio::test]
async fn test_non_html_streams_with_query_minus_session() {
    let port = spawn_upstream().await;
    let (router, _dir) = gateway();

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/dev-server/proxy/{port}/data.json?page=2&sandboxSessionId=unknown&q=a"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_LENGTH).is_some());
    assert_eq!(body_text(response).await, "{\"query\":\"page=2&q=a\"}");
}

#[tokio::test]
async fn test_post_body_is_forwarded() {
    let port = spawn_upstream().await;
    let (router, _dir) = gateway();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/dev-server/proxy/{port}/echo"))
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "payload");
}

#[tokio::test]
async fn test_encoded_path_reaches_upstream_unchanged() {
    let port = spawn_upstream().await;
    let (router, _dir) = gateway();

    for (path, expected) in [
        ("files/a%3Fb", "/files/a%3Fb|"),
        ("files/a%23b", "/files/a%23b|"),
        ("files/a%2Fb", "/files/a%2Fb|"),
        ("files/a%20b?x=1", "/files/a%20b|x=1"),
    ] {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/dev-server/proxy/{port}/{path}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(body_text(response).await, expected, "{path}");
    }
}
