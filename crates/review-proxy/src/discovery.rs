//! Endpoint discovery against the control-plane API.
//!
//! Every call to [`EndpointDirectory::refresh`] lists the pipeline's review
//! apps and resolves each deployed app to its public base URL. Nothing is
//! cached between calls.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::Instrument;

use crate::config::ControlPlaneConfig;
use crate::error::{DiscoveryError, LookupError};

/// Accept header pinning the control-plane API version.
pub const API_ACCEPT: &str = "application/vnd.heroku+json; version=3";

/// One live review app, resolved for a single discovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Control-plane application id.
    pub id: String,
    pub base_url: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
        }
    }

    /// Join the base URL with an inbound path (which starts with `/`).
    pub fn url_for(&self, path_and_query: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }
}

/// Source of the current live endpoint set.
#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    /// Resolve the live endpoints, in a stable order.
    ///
    /// Fails only when the listing itself fails; individual lookups that fail
    /// shrink the result instead.
    async fn refresh(&self) -> Result<Vec<Endpoint>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct ReviewApp {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    /// Null while the app is still being created.
    #[serde(default)]
    app: Option<AppRef>,
}

#[derive(Debug, Deserialize)]
struct AppRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AppDetail {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

/// [`EndpointDirectory`] backed by the Heroku platform API.
#[derive(Clone)]
pub struct HerokuDirectory {
    client: reqwest::Client,
    api_url: String,
    pipeline_id: String,
    api_key: String,
    timeout: Duration,
}

impl HerokuDirectory {
    pub fn new(client: reqwest::Client, config: &ControlPlaneConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            pipeline_id: config.pipeline_id.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(reqwest::header::ACCEPT, API_ACCEPT)
            .bearer_auth(&self.api_key)
    }

    async fn list_review_apps(&self) -> Result<Vec<ReviewApp>, DiscoveryError> {
        let url = format!("{}/pipelines/{}/review-apps", self.api_url, self.pipeline_id);

        let call = async {
            let resp = self.get(&url).send().await.map_err(DiscoveryError::Request)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(DiscoveryError::Status(status.as_u16()));
            }
            resp.json::<Vec<ReviewApp>>()
                .await
                .map_err(DiscoveryError::Decode)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout(self.timeout)),
        }
    }
}

/// Fetch `web_url` for one app.
async fn lookup_app(
    client: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<AppDetail, LookupError> {
    let call = async {
        let resp = client.send().await.map_err(LookupError::Request)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        resp.json::<AppDetail>().await.map_err(LookupError::Decode)
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(LookupError::Timeout(timeout)),
    }
}

#[async_trait]
impl EndpointDirectory for HerokuDirectory {
    async fn refresh(&self) -> Result<Vec<Endpoint>, DiscoveryError> {
        let span = review_tracing::discovery_span!(&self.pipeline_id);
        let start = Instant::now();

        async {
            let review_apps = self.list_review_apps().await?;
            tracing::Span::current().record("review_apps", review_apps.len());

            let mut lookups = Vec::new();
            for review_app in review_apps {
                let Some(app) = review_app.app else {
                    tracing::debug!(
                        review_app = ?review_app.id,
                        branch = ?review_app.branch,
                        "Skipping review app without a deployed app"
                    );
                    continue;
                };

                let request = self.get(&format!("{}/apps/{}", self.api_url, app.id));
                let timeout = self.timeout;
                let handle = tokio::spawn(lookup_app(request, timeout));
                lookups.push((app.id, handle));
            }

            // Awaiting in listing order keeps the result stable; the lookups
            // themselves are already running concurrently.
            let mut endpoints = Vec::with_capacity(lookups.len());
            for (app_id, handle) in lookups {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(app_id = %app_id, error = %e, "App lookup task aborted");
                        continue;
                    }
                };

                match result.and_then(|detail| {
                    detail
                        .web_url
                        .filter(|url| !url.is_empty())
                        .map(|url| (detail.name, url))
                        .ok_or(LookupError::MissingUrl)
                }) {
                    Ok((name, web_url)) => {
                        tracing::debug!(app_id = %app_id, app_name = ?name, web_url = %web_url, "Resolved review app");
                        endpoints.push(Endpoint::new(app_id, web_url));
                    }
                    Err(e) => {
                        tracing::warn!(app_id = %app_id, error = %e, "Dropping review app, lookup failed");
                    }
                }
            }

            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("resolved", endpoints.len());
            tracing::Span::current().record("latency_ms", latency);
            tracing::info!(
                endpoints = endpoints.len(),
                latency_ms = latency,
                "Found {} review apps",
                endpoints.len()
            );

            Ok::<_, DiscoveryError>(endpoints)
        }
        .instrument(span)
        .await
    }
}
