//! Local fake control plane and review apps for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const PIPELINE_ID: &str = "pipe-123";
pub const API_KEY: &str = "test-key";

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A review app answering every request with `status` and `body` after `delay`.
pub async fn review_app(status: u16, body: &'static str, delay: Duration) -> String {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        (
            StatusCode::from_u16(status).unwrap(),
            [("x-review-app", body)],
            body,
        )
    });
    serve(app).await
}

/// A review app that echoes what it received as JSON.
pub async fn echo_app() -> String {
    async fn echo(request: Request) -> Json<Value> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let headers: HashMap<String, String> = parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Json(json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path_and_query().map(|pq| pq.as_str()),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
    }
    serve(Router::new().fallback(echo)).await
}

/// A base URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// How the fake control plane answers `GET /apps/{id}`.
#[derive(Clone)]
pub enum AppDetail {
    WebUrl(String),
    /// `web_url` after a delay.
    SlowWebUrl(String, Duration),
    Status(u16),
    NoWebUrl,
}

#[derive(Clone)]
struct ControlPlane {
    review_apps: Value,
    details: Arc<HashMap<String, AppDetail>>,
    list_delay: Duration,
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"));
    let versioned = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("version=3"));
    bearer && versioned
}

async fn list_review_apps(
    State(cp): State<ControlPlane>,
    Path(pipeline_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if pipeline_id != PIPELINE_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    tokio::time::sleep(cp.list_delay).await;
    Json(cp.review_apps.clone()).into_response()
}

async fn app_detail(
    State(cp): State<ControlPlane>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match cp.details.get(&app_id) {
        Some(AppDetail::WebUrl(url)) => {
            Json(json!({ "id": app_id, "name": format!("app-{app_id}"), "web_url": url }))
                .into_response()
        }
        Some(AppDetail::SlowWebUrl(url, delay)) => {
            tokio::time::sleep(*delay).await;
            Json(json!({ "id": app_id, "web_url": url })).into_response()
        }
        Some(AppDetail::Status(status)) => StatusCode::from_u16(*status).unwrap().into_response(),
        Some(AppDetail::NoWebUrl) => Json(json!({ "id": app_id, "web_url": null })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start a fake control plane.
///
/// `apps` lists review apps in pipeline order: `Some((id, detail))` for a
/// deployed app, `None` for one still being created.
pub async fn control_plane(apps: Vec<Option<(&str, AppDetail)>>, list_delay: Duration) -> String {
    let mut review_apps = Vec::new();
    let mut details = HashMap::new();
    for (i, app) in apps.into_iter().enumerate() {
        match app {
            Some((id, detail)) => {
                review_apps.push(json!({
                    "id": format!("ra-{i}"),
                    "branch": format!("branch-{i}"),
                    "app": { "id": id },
                }));
                details.insert(id.to_string(), detail);
            }
            None => review_apps.push(json!({
                "id": format!("ra-{i}"),
                "branch": format!("branch-{i}"),
                "app": null,
            })),
        }
    }

    let state = ControlPlane {
        review_apps: Value::Array(review_apps),
        details: Arc::new(details),
        list_delay,
    };
    let app = Router::new()
        .route("/pipelines/{pipeline_id}/review-apps", get(list_review_apps))
        .route("/apps/{app_id}", get(app_detail))
        .with_state(state);
    serve(app).await
}

pub fn control_plane_config(api_url: &str, timeout_secs: u64) -> review_proxy::config::ControlPlaneConfig {
    review_proxy::config::ControlPlaneConfig {
        api_url: api_url.to_string(),
        pipeline_id: PIPELINE_ID.to_string(),
        api_key: API_KEY.to_string(),
        timeout_secs,
    }
}

/// HTTP client that ignores any proxy settings in the test environment.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
