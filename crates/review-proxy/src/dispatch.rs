//! Concurrent fan-out of one inbound request to every discovered endpoint.
//!
//! Each endpoint gets its own tokio task and its own deadline. The dispatcher
//! returns only after every task has finished, so the selector always sees
//! the complete outcome set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::Instrument;

use crate::discovery::Endpoint;
use crate::error::DispatchError;

/// The request replayed against every endpoint of one cycle.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Inbound path plus query string, starting with `/`.
    pub path_and_query: String,
    /// Inbound headers minus `Host`. Cookies ride along in `Cookie`.
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Build from inbound request parts, dropping only the `Host` header.
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut headers = parts.headers.clone();
        headers.remove(http::header::HOST);

        Self {
            method: parts.method.clone(),
            path_and_query,
            headers,
            body,
        }
    }
}

/// A complete HTTP response from one endpoint, any status.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What happened to the call against one endpoint.
#[derive(Debug)]
pub struct UpstreamOutcome {
    pub endpoint: Endpoint,
    /// Position of the endpoint in discovery order.
    pub slot: usize,
    /// Order in which this call reached a terminal state, starting at 0.
    pub completion_rank: usize,
    pub result: Result<UpstreamResponse, DispatchError>,
}

impl UpstreamOutcome {
    pub fn status(&self) -> Option<StatusCode> {
        self.result.as_ref().ok().map(|r| r.status)
    }

    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| s.is_success())
    }
}

/// Fans one request out to a fixed endpoint set.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Returns exactly one outcome per endpoint, in endpoint order.
    async fn dispatch(
        &self,
        request: Arc<UpstreamRequest>,
        endpoints: &[Endpoint],
    ) -> Vec<UpstreamOutcome>;
}

/// [`Dispatcher`] that performs real HTTP calls with reqwest.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDispatcher {
    /// `timeout` bounds each call individually, body read included.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

async fn call_endpoint(
    client: reqwest::Client,
    request: Arc<UpstreamRequest>,
    url: String,
    timeout: Duration,
) -> Result<UpstreamResponse, DispatchError> {
    let call = async {
        let resp = client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(DispatchError::Request)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(DispatchError::Body)?;

        Ok::<_, DispatchError>(UpstreamResponse {
            status,
            headers,
            body,
        })
    };

    // Dropping the call future on expiry cancels only this endpoint's request.
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(timeout)),
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        request: Arc<UpstreamRequest>,
        endpoints: &[Endpoint],
    ) -> Vec<UpstreamOutcome> {
        let finished = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = endpoints
            .iter()
            .map(|endpoint| {
                let client = self.client.clone();
                let request = request.clone();
                let finished = finished.clone();
                let timeout = self.timeout;
                let url = endpoint.url_for(&request.path_and_query);
                let span = review_tracing::upstream_call_span!(&endpoint.id, &url);

                tokio::spawn(
                    async move {
                        let start = Instant::now();
                        let result = call_endpoint(client, request, url, timeout).await;
                        let rank = finished.fetch_add(1, Ordering::AcqRel);

                        let latency = start.elapsed().as_millis() as u64;
                        let span = tracing::Span::current();
                        span.record("latency_ms", latency);
                        span.record("completion_rank", rank);
                        match &result {
                            Ok(resp) => {
                                span.record("status", resp.status.as_u16());
                            }
                            Err(e) => {
                                span.record("status", 0_u16);
                                tracing::debug!(error = %e, "Upstream call failed");
                            }
                        }

                        (rank, result)
                    }
                    .instrument(span),
                )
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (slot, (endpoint, handle)) in endpoints.iter().zip(handles).enumerate() {
            let (completion_rank, result) = match handle.await {
                Ok(done) => done,
                Err(e) => (
                    finished.fetch_add(1, Ordering::AcqRel),
                    Err(DispatchError::Aborted(e.to_string())),
                ),
            };
            outcomes.push(UpstreamOutcome {
                endpoint: endpoint.clone(),
                slot,
                completion_rank,
                result,
            });
        }
        outcomes
    }
}
