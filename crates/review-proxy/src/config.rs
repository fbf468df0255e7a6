//! Configuration types and loading logic.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use review_tracing::TracingConfig;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::select::FallbackPolicy;

/// Env var holding the pipeline id, as set by the hosting platform.
pub const PIPELINE_ENV: &str = "HEROKU_PIPELINE";
/// Env var holding the control-plane API token.
pub const API_KEY_ENV: &str = "HEROKU_API_KEY";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Inbound listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Total time an inbound request may take, discovery and fan-out included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Control-plane API used for discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub pipeline_id: String,

    #[serde(default)]
    pub api_key: String,

    /// Applies to the listing call and to each app lookup separately.
    #[serde(default = "default_control_plane_timeout")]
    pub timeout_secs: u64,
}

/// Fan-out behaviour towards review apps.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub fallback: FallbackPolicy,
}

fn default_listen_address() -> String {
    "0.0.0.0:3080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_api_url() -> String {
    "https://api.heroku.com".to_string()
}

fn default_control_plane_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            pipeline_id: String::new(),
            api_key: String::new(),
            timeout_secs: default_control_plane_timeout(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ProxyConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. `HEROKU_PIPELINE` / `HEROKU_API_KEY`
    /// 2. Environment variables (REVIEW_PROXY_ prefix, __ for nesting)
    /// 3. TOML config file
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("REVIEW_PROXY_").split("__"));
        let mut config = Self::from_figment(figment)?;

        if let Ok(pipeline) = std::env::var(PIPELINE_ENV) {
            config.control_plane.pipeline_id = pipeline;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.control_plane.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    /// Extract from an already-assembled figment without touching the process env.
    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }

    /// Check required values and the timeout budget.
    ///
    /// Discovery makes two sequential control-plane round trips (listing, then
    /// lookups) before the fan-out, so all three must fit inside the inbound
    /// budget for the proxy to answer before the caller gives up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_plane.pipeline_id.trim().is_empty() {
            return Err(ConfigError::Missing("pipeline_id", PIPELINE_ENV));
        }
        if self.control_plane.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key", API_KEY_ENV));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Zero("upstream.timeout_secs"));
        }
        if self.control_plane.timeout_secs == 0 {
            return Err(ConfigError::Zero("control_plane.timeout_secs"));
        }

        let worst_case = self
            .control_plane
            .timeout_secs
            .checked_mul(2)
            .and_then(|discovery| discovery.checked_add(self.upstream.timeout_secs));
        match worst_case {
            Some(total) if total < self.server.request_timeout_secs => Ok(()),
            _ => Err(ConfigError::TimeoutBudget {
                control_plane: self.control_plane.timeout_secs,
                upstream: self.upstream.timeout_secs,
                inbound: self.server.request_timeout_secs,
            }),
        }
    }
}
