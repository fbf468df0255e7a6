//! Error types for discovery, fan-out, and configuration.

use thiserror::Error;

/// The pipeline listing call failed. Fatal for the whole request.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("review-app listing timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("review-app listing request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("review-app listing returned HTTP {0}")]
    Status(u16),

    #[error("review-app listing body could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
}

impl DiscoveryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DiscoveryError::Timeout(_))
    }
}

/// A single application detail lookup failed. Only that endpoint is dropped.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("app lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("app lookup request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("app lookup returned HTTP {0}")]
    Status(u16),

    #[error("app detail could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("app has no web_url")]
    MissingUrl,
}

/// One fan-out call did not produce an HTTP response.
///
/// Carried inside an outcome; never surfaced to the caller directly.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("reading upstream body failed: {0}")]
    Body(#[source] reqwest::Error),

    #[error("upstream task aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout(_))
    }
}

/// Startup configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("control_plane.{0} is required (or set {1})")]
    Missing(&'static str, &'static str),

    #[error(
        "timeout budget exceeded: 2 x control_plane.timeout_secs ({control_plane}s) + \
         upstream.timeout_secs ({upstream}s) must be below server.request_timeout_secs ({inbound}s)"
    )]
    TimeoutBudget {
        control_plane: u64,
        upstream: u64,
        inbound: u64,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
