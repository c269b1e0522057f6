use std::sync::Arc;

use clap::Parser;

mod cache;
mod config;
mod domain;
mod engines;
mod http;
mod ingress;
mod lifecycle;
mod observability;
mod orchestrator;
mod parsers;
mod tailer;

use cache::DetectionCache;
use config::GatewayConfig;
use http::AppState;
use ingress::IngressAdapter;
use lifecycle::Lifecycle;
use orchestrator::ScanOrchestrator;

/// Antivirus scanning gateway: reconciles on-demand scans with a tailed
/// real-time-scan log behind a single uniform HTTP endpoint.
#[derive(Debug, Parser)]
#[command(name = "avwarden", version, about)]
struct Args {
    /// Override LOG_LEVEL without touching the environment.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    observability::init_tracing(&config.log_level);
    observability::init_metrics();

    if let Err(e) = tokio::fs::create_dir_all(&config.upload_dir).await {
        tracing::error!(path = %config.upload_dir.display(), error = %e, "failed to create upload directory");
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let cache = DetectionCache::new();
    let driver = engines::build_driver(&config, cache.clone());

    let lifecycle = Lifecycle::start(driver.clone(), cache).await;

    let orchestrator = Arc::new(ScanOrchestrator::new(driver.clone(), lifecycle.cache.clone()));
    let ingress = Arc::new(IngressAdapter::new(config.upload_dir.clone(), orchestrator));

    let app_state = AppState {
        config: config.clone(),
        driver: driver.clone(),
        ingress,
    };
    let app = http::build_router(app_state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(address = %bind_addr, engine = %config.active_engine, "gateway listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle.shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
