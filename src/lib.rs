pub mod api;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod models;
pub mod refresh;
pub mod storage;

use api::{AppState, StatusBoard, create_api_router};
use archive::ArchiveConfig;
use axum::Router;
use catalog::Catalog;
use config::Config;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::RefreshResult;
use refresh::{ArchiveRefresher, RefreshSupervisor, initial_refresh};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_rapidoc::RapiDoc;

/// Capacity of the channel carrying refresh reports to the service
const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Initialize the tracing subscriber for logging
/// Uses journald when running as a service (no terminal), fmt when running interactively
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "madison_mirror=info,tower_http=warn".into());

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return;
    }

    match tracing_journald::layer() {
        Ok(journald) => tracing_subscriber::registry()
            .with(env_filter)
            .with(journald)
            .init(),
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            tracing::warn!(error = %e, "journald unavailable, logging to stdout");
        }
    }
}

/// Assemble the HTTP application: lookup and status routes plus API docs.
pub fn build_router(state: Arc<AppState>) -> Router {
    let (api_router, api_doc) = create_api_router(state).split_for_parts();

    let doc_routes = Router::new()
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    Router::new()
        .merge(api_router)
        .merge(doc_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the mirror service
pub async fn run_service(
    config_path: Option<&str>,
    cache_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    tracing::info!("madison-mirror version {}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(config_path)?;
    if let Some(cache_dir) = cache_dir {
        config.cache_directory = cache_dir;
    }

    tracing::info!(
        archives = config.archives.len(),
        cache_directory = %config.cache_directory.display(),
        refresh_interval_secs = config.refresh_interval_secs,
        "Loaded configuration"
    );

    let archives = ArchiveConfig::open_all(&config).await?;
    let refreshers: Vec<Arc<ArchiveRefresher>> = archives
        .iter()
        .map(|archive| Arc::new(ArchiveRefresher::new(Arc::clone(archive))))
        .collect();

    let state = Arc::new(AppState {
        catalog: Catalog::from_archives(&archives),
        status: StatusBoard::new(archives.iter().map(|a| a.id.to_string()).collect()),
        metrics: install_metrics_recorder(),
    });

    // Forced pass over every archive before accepting lookups
    tracing::info!("Running startup refresh");
    for result in initial_refresh(&refreshers).await {
        record_refresh(&state, result).await;
    }

    let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    let reporter = tokio::spawn(report_refreshes(reports_rx, Arc::clone(&state)));
    let supervisor = RefreshSupervisor::start(&refreshers, config.refresh_interval(), reports_tx);

    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("Stopping refresh tasks");
    supervisor.shutdown().await;
    if let Err(e) = reporter.await {
        tracing::error!(error = %e, "Refresh reporter failed");
    }

    served?;
    Ok(())
}

fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install metrics recorder, /api/metrics disabled");
            None
        }
    }
}

/// Log a finished pass, export its metrics and publish it on the status board.
pub async fn record_refresh(state: &AppState, result: RefreshResult) {
    metrics::histogram!("madison_refresh_duration_seconds", "archive" => result.archive.clone())
        .record(result.duration.as_secs_f64());
    metrics::gauge!("madison_refresh_records", "archive" => result.archive.clone())
        .set(result.records as f64);

    match &result.error {
        None => tracing::info!(
            archive = %result.archive,
            records = result.records,
            replaced = result.pockets_replaced,
            unchanged = result.pockets_unchanged,
            duration_ms = result.duration.as_millis() as u64,
            "Refresh finished"
        ),
        Some(error) => {
            metrics::counter!("madison_refresh_failures_total", "archive" => result.archive.clone())
                .increment(1);
            tracing::error!(
                archive = %result.archive,
                records = result.records,
                replaced = result.pockets_replaced,
                unchanged = result.pockets_unchanged,
                error = %error,
                "Refresh finished with errors"
            );
        }
    }

    state.status.record(result).await;
}

async fn report_refreshes(mut reports: mpsc::Receiver<RefreshResult>, state: Arc<AppState>) {
    while let Some(result) = reports.recv().await {
        record_refresh(&state, result).await;
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
