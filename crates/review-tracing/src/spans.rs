//! Span builders for review-proxy instrumentation.

/// Span for one inbound request, from discovery to the written response.
///
/// Fields recorded later by the handler:
/// - `endpoints`: number of endpoints discovery returned
/// - `status`: status code sent back to the caller
/// - `selected`: id of the endpoint whose response was relayed
#[macro_export]
macro_rules! proxy_request_span {
    ($correlation_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "proxy_request",
            correlation_id = %$correlation_id,
            method = %$method,
            path = %$path,
            endpoints = tracing::field::Empty,
            status = tracing::field::Empty,
            selected = tracing::field::Empty,
        )
    };
}

/// Span for one discovery cycle against the control plane.
#[macro_export]
macro_rules! discovery_span {
    ($pipeline_id:expr) => {
        tracing::info_span!(
            "discovery",
            pipeline_id = %$pipeline_id,
            review_apps = tracing::field::Empty,
            resolved = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Span for one fan-out call to a single endpoint.
#[macro_export]
macro_rules! upstream_call_span {
    ($endpoint_id:expr, $url:expr) => {
        tracing::info_span!(
            "upstream_call",
            endpoint = %$endpoint_id,
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            completion_rank = tracing::field::Empty,
        )
    };
}
