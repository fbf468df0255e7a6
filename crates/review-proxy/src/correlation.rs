//! Correlation ID generation for request tracing.

use uuid::Uuid;

/// Inbound header whose value is reused as the correlation id when present.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a new correlation ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reuse the caller's request id if it sent a printable one, otherwise mint one.
pub fn from_headers(headers: &http::HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(generate_id)
}
