//! Mini-app runner
//!
//! Single-binary service that:
//! 1. Loads user-bots and the target mini-app from TOML
//! 2. Verifies every proxy and authorizes every session through the sidecar
//! 3. Runs the configured worker on a schedule (or on `POST /run`)
//! 4. Serves `/health` and Prometheus `/metrics`

mod config;
mod metrics;
mod sidecar;
mod strategy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use miniapp_parser::{Parser, WorkerHandle};
use requester::{ReqwestTransport, Requester};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userbot_pool::IdentityPool;

use crate::config::Config;
use crate::metrics::MetricsObserver;
use crate::sidecar::SidecarConnector;
use crate::strategy::JsonStrategy;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<IdentityPool>,
    worker: Option<WorkerHandle<JsonStrategy>>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/run", post(run_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting miniapp-runner");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        bot = %config.parser.bot_username,
        app_base_url = %config.parser.app_base_url,
        user_bots = config.user_bots.len(),
        schedule = ?config.schedule,
        "configuration loaded"
    );

    let transport = ReqwestTransport::new(Duration::from_secs(config.request.timeout_secs))
        .context("failed to build HTTP client")?;
    let requester = Arc::new(Requester::new(Arc::new(transport)));
    let sidecar_timeout = Duration::from_secs(config.sidecar.timeout_secs);
    let connector = SidecarConnector::new(&config.sidecar.url, sidecar_timeout)
        .context("failed to build sidecar client")?;

    let pool = Arc::new(IdentityPool::new(
        config.user_bots.clone(),
        requester.clone(),
        Arc::new(connector),
    ));
    pool.initialize()
        .await
        .context("identity pool initialization failed")?;

    let strategy = JsonStrategy::from_config(&config.strategy)?;
    let parser = Parser::with_observer(
        pool.clone(),
        requester,
        strategy,
        config.parser_options(),
        Arc::new(MetricsObserver),
    )?;
    let worker = parser.initialize().await?;

    let app = build_router(AppState {
        pool,
        worker,
        prometheus,
        started_at: Instant::now(),
    });

    let listen_addr = config.status.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "status server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Let a running cycle finish, then stop the status server.
    parser.shutdown().await;
    let _ = shutdown_tx.send(());

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "status server error during shutdown"),
        Err(e) => error!(error = %e, "status server task panicked"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 with identity count while at least one user-bot is
/// in rotation, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let identities = state.pool.list_connected().await;
    let status_code = if identities.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = serde_json::json!({
        "status": if identities.is_empty() { "degraded" } else { "healthy" },
        "identities": identities.len(),
        "mode": if state.worker.is_some() { "on_demand" } else { "loop" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Run one worker cycle on demand. An empty request body means no worker body.
async fn run_handler(State(state): State<AppState>, body: axum::body::Bytes) -> impl IntoResponse {
    let Some(worker) = &state.worker else {
        return (
            StatusCode::CONFLICT,
            axum::Json(serde_json::json!({ "error": "worker runs on a schedule" })),
        );
    };

    let args = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({ "error": format!("invalid JSON body: {e}") })),
                );
            }
        }
    };

    match worker.run(args).await {
        Ok(Some(output)) => (StatusCode::OK, axum::Json(output)),
        Ok(None) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(serde_json::json!({ "error": "worker cycle failed, see logs" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
