//! Per-request orchestration: read the body, discover, fan out, select, respond.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use tracing::Instrument;

use crate::correlation;
use crate::discovery::EndpointDirectory;
use crate::dispatch::{Dispatcher, UpstreamOutcome, UpstreamRequest, UpstreamResponse};
use crate::select::{ProxyDecision, ResponseSelector};
use crate::stats::ProxyStats;

/// Response headers describing the upstream connection's framing. The body is
/// fully buffered and re-framed by the server, so these are not relayed.
const FRAMING_HEADERS: &[&str] = &["connection", "keep-alive", "transfer-encoding"];

/// Turns one inbound request into one relayed upstream response.
#[derive(Clone)]
pub struct ProxyHandler {
    directory: Arc<dyn EndpointDirectory>,
    dispatcher: Arc<dyn Dispatcher>,
    selector: ResponseSelector,
    stats: ProxyStats,
    max_body_bytes: usize,
}

impl ProxyHandler {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        dispatcher: Arc<dyn Dispatcher>,
        selector: ResponseSelector,
        stats: ProxyStats,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            directory,
            dispatcher,
            selector,
            stats,
            max_body_bytes,
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let correlation_id = correlation::from_headers(&parts.headers);
        let span = review_tracing::proxy_request_span!(&correlation_id, &parts.method, parts.uri.path());

        self.stats.inc_requests();

        async {
            let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
                Ok(b) => b,
                Err(e) if exceeds_limit(&e) => {
                    tracing::warn!(limit = self.max_body_bytes, "Request body too large");
                    return reject(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read request body");
                    return reject(StatusCode::BAD_REQUEST, "failed to read request body");
                }
            };

            let endpoints = match self.directory.refresh().await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    self.stats.inc_discovery_failures();
                    let status = if e.is_timeout() {
                        StatusCode::GATEWAY_TIMEOUT
                    } else {
                        StatusCode::BAD_GATEWAY
                    };
                    tracing::Span::current().record("status", status.as_u16());
                    tracing::error!(error = %e, "Endpoint discovery failed, not fanning out");
                    return (status, "upstream unavailable").into_response();
                }
            };

            tracing::Span::current().record("endpoints", endpoints.len());
            if endpoints.is_empty() {
                tracing::info!("No live endpoints discovered");
                return self.not_found();
            }

            let request = Arc::new(UpstreamRequest::from_parts(&parts, body));
            let outcomes = self.dispatcher.dispatch(request, &endpoints).await;
            self.log_outcomes(&outcomes);

            match self.selector.select(outcomes) {
                ProxyDecision::Relay(UpstreamOutcome {
                    endpoint,
                    result: Ok(response),
                    ..
                }) => {
                    let span = tracing::Span::current();
                    span.record("selected", endpoint.id.as_str());
                    span.record("status", response.status.as_u16());
                    self.stats.inc_relayed();
                    relay(response)
                }
                ProxyDecision::Relay(_) | ProxyDecision::NotFound => self.not_found(),
            }
        }
        .instrument(span)
        .await
    }

    fn log_outcomes(&self, outcomes: &[UpstreamOutcome]) {
        let mut errors = 0;
        for outcome in outcomes {
            match &outcome.result {
                Ok(response) => tracing::info!(
                    endpoint = %outcome.endpoint.id,
                    url = %outcome.endpoint.base_url,
                    status = response.status.as_u16(),
                    completion_rank = outcome.completion_rank,
                    "Got {} response from {}",
                    response.status.as_u16(),
                    outcome.endpoint.base_url
                ),
                Err(e) => {
                    errors += 1;
                    tracing::warn!(
                        endpoint = %outcome.endpoint.id,
                        url = %outcome.endpoint.base_url,
                        timeout = e.is_timeout(),
                        error = %e,
                        "Upstream call failed"
                    );
                }
            }
        }
        self.stats.add_upstream_errors(errors);
    }

    fn not_found(&self) -> Response {
        self.stats.inc_not_found();
        tracing::Span::current().record("status", StatusCode::NOT_FOUND.as_u16());
        StatusCode::NOT_FOUND.into_response()
    }
}

fn reject(status: StatusCode, message: &'static str) -> Response {
    tracing::Span::current().record("status", status.as_u16());
    (status, message).into_response()
}

/// True when reading the body stopped at the configured size limit, whether
/// the limit was hit here or by the body-limit layer wrapping the request.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Build the client response from the selected upstream response.
fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;

    let mut headers = upstream.headers;
    for name in FRAMING_HEADERS {
        headers.remove(*name);
    }
    *response.headers_mut() = headers;
    response
}
