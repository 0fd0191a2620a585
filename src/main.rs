mod api;
mod config;
mod db;
mod error;
mod fanout;
mod service;
mod state;
mod suppression;
mod types;

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState, API_KEY_HEADER};
use crate::config::{Config, StoreBackend};
use crate::db::SqliteStore;
use crate::error::{AppError, Result};
use crate::fanout::{FanOut, Heartbeat};
use crate::service::DealService;
use crate::state::{DealStore, MemoryStore};
use crate::suppression::{Purger, SuppressionEngine};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    match cfg.store_backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::connect(&cfg.db_path).await?);
            serve(cfg, store).await
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; data is lost on exit");
            serve(cfg, MemoryStore::new()).await
        }
    }
}

async fn serve<S: DealStore>(cfg: Config, store: Arc<S>) -> Result<()> {
    let fanout = FanOut::new(cfg.subscriber_queue_capacity);
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    let engine = SuppressionEngine::new(
        Arc::clone(&store),
        cfg.price_basis,
        cfg.suppression_window_ms(),
    );
    let service = DealService::new(
        store,
        engine.clone(),
        Arc::clone(&fanout),
        Arc::clone(&health),
        cfg.deals_list_limit,
    );

    // --- Background tasks ---

    // Purger (runs once now, then every PURGE_INTERVAL_SECS)
    let purger = Purger::new(engine, Arc::clone(&health), cfg.purge_interval_secs);
    tokio::spawn(purger.run());

    // SSE heartbeat
    let heartbeat = Heartbeat::new(Arc::clone(&fanout), cfg.heartbeat_interval_secs);
    tokio::spawn(heartbeat.run());

    // --- HTTP API server ---
    let api_state = ApiState {
        service: Arc::new(service),
        fanout: Arc::clone(&fanout),
        health,
        latency,
        api_key: cfg.api_key.as_deref().map(Arc::from),
    };
    let app = router(api_state).layer(cors_layer(&cfg.allow_origin)?);

    let bind_addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        store = ?cfg.store_backend,
        price_basis = %cfg.price_basis,
        window_secs = cfg.suppression_window_secs,
        auth = cfg.api_key.is_some(),
        "HTTP API listening on {bind_addr}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fanout))
        .await?;

    info!("Server stopped");
    Ok(())
}

fn cors_layer(allow_origin: &str) -> Result<CorsLayer> {
    let origin = match allow_origin.trim() {
        "*" => AllowOrigin::any(),
        exact => HeaderValue::from_str(exact)
            .map(AllowOrigin::exact)
            .map_err(|_| AppError::Config(format!("ALLOW_ORIGIN is not a valid origin: {exact:?}")))?,
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)]))
}

/// Resolves on Ctrl-C or SIGTERM. Closing the fan-out ends open SSE streams,
/// which lets axum finish draining.
async fn shutdown_signal(fanout: Arc<FanOut>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }

    fanout.close();
}
