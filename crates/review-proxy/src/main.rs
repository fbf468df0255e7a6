//! review-proxy binary: load config, start tracing, serve.

use std::sync::Arc;

use review_proxy::config::ProxyConfig;
use review_proxy::discovery::HerokuDirectory;
use review_proxy::dispatch::HttpDispatcher;
use review_proxy::handler::ProxyHandler;
use review_proxy::select::ResponseSelector;
use review_proxy::server::{self, AppState};
use review_proxy::stats::ProxyStats;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("REVIEW_PROXY_CONFIG").ok())
            .unwrap_or_else(|| "review-proxy.toml".to_string())
    };

    let config = ProxyConfig::load(&config_path)?;

    // Build the tokio runtime first; the tonic exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = review_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            api_url = %config.control_plane.api_url,
            pipeline_id = %config.control_plane.pipeline_id,
            upstream_timeout_secs = config.upstream.timeout_secs,
            fallback = ?config.upstream.fallback,
            otlp_export = tracing_guard.exporting(),
            "Starting review-proxy"
        );

        run(config).await
    })
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    // Separate clients so control-plane and review-app pools don't mix
    let control_plane_client = reqwest::Client::builder().build()?;
    let upstream_client = reqwest::Client::builder().build()?;

    let directory = HerokuDirectory::new(control_plane_client, &config.control_plane);
    let dispatcher = HttpDispatcher::new(upstream_client, config.upstream.timeout());
    let stats = ProxyStats::new();

    let handler = ProxyHandler::new(
        Arc::new(directory),
        Arc::new(dispatcher),
        ResponseSelector::new(config.upstream.fallback),
        stats.clone(),
        config.server.max_body_bytes,
    );

    let state = AppState { handler, stats };
    server::run(&config, state).await
}
