//! End-to-end: router + real discovery + real fan-out against local servers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use review_proxy::discovery::HerokuDirectory;
use review_proxy::dispatch::HttpDispatcher;
use review_proxy::handler::ProxyHandler;
use review_proxy::select::{FallbackPolicy, ResponseSelector};
use review_proxy::server::{self, AppState};
use review_proxy::stats::ProxyStats;
use tower::ServiceExt;

mod common;

use common::AppDetail;

fn proxy(api_url: &str, fallback: FallbackPolicy) -> Router {
    proxy_with_limits(api_url, fallback, Duration::from_secs(10), 1024 * 1024)
}

fn proxy_with_limits(
    api_url: &str,
    fallback: FallbackPolicy,
    request_timeout: Duration,
    max_body_bytes: usize,
) -> Router {
    let directory = HerokuDirectory::new(common::client(), &common::control_plane_config(api_url, 1));
    let dispatcher = HttpDispatcher::new(common::client(), Duration::from_secs(2));
    let stats = ProxyStats::new();
    let handler = ProxyHandler::new(
        Arc::new(directory),
        Arc::new(dispatcher),
        ResponseSelector::new(fallback),
        stats.clone(),
        max_body_bytes,
    );
    server::router(AppState { handler, stats }, request_timeout, max_body_bytes)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "front-door.example.com")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_healthy_app_answers_when_sibling_is_down() {
    let down = common::review_app(503, "maintenance", Duration::ZERO).await;
    let up = common::review_app(200, "OK", Duration::from_millis(100)).await;
    let api = common::control_plane(
        vec![
            Some(("app-a", AppDetail::WebUrl(down))),
            Some(("app-b", AppDetail::WebUrl(up))),
        ],
        Duration::ZERO,
    )
    .await;

    let (status, headers, body) = send(proxy(&api, FallbackPolicy::default()), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(headers["x-review-app"], "OK");
}

#[tokio::test]
async fn test_all_erroring_relays_last_to_finish() {
    let fast = common::review_app(500, "fast failure", Duration::ZERO).await;
    let slow = common::review_app(500, "slow failure", Duration::from_millis(300)).await;
    let api = common::control_plane(
        vec![
            Some(("app-a", AppDetail::WebUrl(slow))),
            Some(("app-b", AppDetail::WebUrl(fast))),
        ],
        Duration::ZERO,
    )
    .await;

    let (status, _, body) = send(proxy(&api, FallbackPolicy::LastCompleted), get("/")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "slow failure");
}

#[tokio::test]
async fn test_all_erroring_relays_first_discovered_by_default() {
    let fast = common::review_app(500, "fast failure", Duration::ZERO).await;
    let slow = common::review_app(502, "slow failure", Duration::from_millis(300)).await;
    let api = common::control_plane(
        vec![
            Some(("app-a", AppDetail::WebUrl(fast))),
            Some(("app-b", AppDetail::WebUrl(slow))),
        ],
        Duration::ZERO,
    )
    .await;

    let (status, _, body) = send(proxy(&api, FallbackPolicy::DiscoveryOrder), get("/")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "fast failure");
}

#[tokio::test]
async fn test_no_review_apps_is_404() {
    let api = common::control_plane(vec![None], Duration::ZERO).await;

    let (status, _, body) = send(proxy(&api, FallbackPolicy::default()), get("/anything")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_unreachable_apps_is_404() {
    let api = common::control_plane(
        vec![Some(("app-a", AppDetail::WebUrl(common::unreachable_url().await)))],
        Duration::ZERO,
    )
    .await;

    let (status, _, _) = send(proxy(&api, FallbackPolicy::default()), get("/")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_timeout_is_gateway_timeout() {
    let app = common::review_app(200, "OK", Duration::ZERO).await;
    let api = common::control_plane(
        vec![Some(("app-a", AppDetail::WebUrl(app)))],
        Duration::from_secs(3),
    )
    .await;

    let (status, _, body) = send(proxy(&api, FallbackPolicy::default()), get("/")).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, "upstream unavailable");
}

#[tokio::test]
async fn test_inbound_request_forwarded_without_host() {
    let echo = common::echo_app().await;
    let echo_authority = echo.trim_start_matches("http://").to_string();
    let api = common::control_plane(vec![Some(("app-a", AppDetail::WebUrl(echo)))], Duration::ZERO).await;

    let request = Request::builder()
        .method("POST")
        .uri("/orders/9?dry_run=1")
        .header("host", "front-door.example.com")
        .header("cookie", "session=xyz")
        .header("x-api-version", "2")
        .body(Body::from("order body"))
        .unwrap();
    let (status, _, body) = send(proxy(&api, FallbackPolicy::default()), request).await;

    assert_eq!(status, StatusCode::OK);
    let echoed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/orders/9?dry_run=1");
    assert_eq!(echoed["body"], "order body");
    assert_eq!(echoed["headers"]["cookie"], "session=xyz");
    assert_eq!(echoed["headers"]["x-api-version"], "2");
    // The client addresses the review app itself, never the front door's host
    assert_eq!(echoed["headers"]["host"], echo_authority);
}

#[tokio::test]
async fn test_admin_routes_answered_locally() {
    let api = common::control_plane(vec![], Duration::ZERO).await;
    let app = proxy(&api, FallbackPolicy::default());

    let (status, _, body) = send(app.clone(), get("/__proxy/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    send(app.clone(), get("/some/page")).await;

    let (status, _, body) = send(app, get("/__proxy/stats")).await;
    assert_eq!(status, StatusCode::OK);
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["not_found"], 1);
}

#[tokio::test]
async fn test_oversized_streamed_body_is_413() {
    // Nothing listens here; reaching discovery would answer 502.
    let api = common::unreachable_url().await;
    let app = proxy_with_limits(&api, FallbackPolicy::default(), Duration::from_secs(10), 8);
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("twenty-six bytes of body!!"))
        .unwrap();

    let (status, _, body) = send(app, request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, "request body too large");
}

#[tokio::test]
async fn test_request_over_inbound_budget_is_408() {
    let api = common::control_plane(
        vec![Some(("app-a", AppDetail::WebUrl("https://a.herokuapp.com/".into())))],
        Duration::from_secs(2),
    )
    .await;
    let app = proxy_with_limits(&api, FallbackPolicy::default(), Duration::from_millis(200), 1024);

    let (status, _, _) = send(app, get("/")).await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
}
