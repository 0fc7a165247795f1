use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::models::{PackageRecord, RefreshResult};
use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::OpenApi;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub struct AppState {
    pub catalog: Catalog,
    pub status: StatusBoard,
    /// Present when a Prometheus recorder was installed
    pub metrics: Option<PrometheusHandle>,
}

/// Last refresh outcome of one archive
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArchiveStatus {
    /// Archive identity
    #[schema(example = "archive.ubuntu.com-ubuntu")]
    pub archive: String,
    /// Most recent pass, absent until the first pass finishes
    pub last_refresh: Option<RefreshResult>,
}

/// Most recent RefreshResult per archive, kept in configuration order.
pub struct StatusBoard {
    order: Vec<String>,
    latest: RwLock<HashMap<String, RefreshResult>>,
}

impl StatusBoard {
    pub fn new(order: Vec<String>) -> Self {
        Self {
            order,
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, result: RefreshResult) {
        self.latest
            .write()
            .await
            .insert(result.archive.clone(), result);
    }

    pub async fn snapshot(&self) -> Vec<ArchiveStatus> {
        let latest = self.latest.read().await;
        self.order
            .iter()
            .map(|archive| ArchiveStatus {
                archive: archive.clone(),
                last_refresh: latest.get(archive).cloned(),
            })
            .collect()
    }
}

/// Look up every cached record of a binary package
#[utoipa::path(
    get,
    path = "/{name}",
    params(
        ("name" = String, Path, description = "Binary package name")
    ),
    responses(
        (status = 200, description = "Matching records, possibly empty", body = Vec<PackageRecord>),
        (status = 404, description = "Name contains a path separator"),
        (status = 500, description = "Package cache unavailable")
    ),
    tag = "packages"
)]
pub async fn lookup_package(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<Vec<PackageRecord>>> {
    // The extractor has already percent-decoded the segment
    if name.contains('/') || name.contains('\\') {
        return Err(Error::NotFound { url: name });
    }

    let records = state.catalog.lookup(&name)?;
    tracing::debug!(package = %name, records = records.len(), "Lookup");
    Ok(Json(records))
}

/// Last refresh pass of every archive
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Refresh status per archive", body = Vec<ArchiveStatus>)
    ),
    tag = "status"
)]
pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<Vec<ArchiveStatus>> {
    Json(state.status.snapshot().await)
}

/// Prometheus exposition of refresh metrics
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus text format", body = String, content_type = "text/plain"),
        (status = 404, description = "Metrics recorder not installed")
    ),
    tag = "status"
)]
pub async fn render_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(PackageRecord, RefreshResult, ArchiveStatus)
    ),
    tags(
        (name = "packages", description = "Package lookup"),
        (name = "status", description = "Refresh status and metrics")
    )
)]
pub struct ApiDoc;

/// Create the API router with all routes
pub fn create_api_router(state: Arc<AppState>) -> OpenApiRouter {
    let status_routes = OpenApiRouter::new()
        .routes(routes!(refresh_status))
        .routes(routes!(render_metrics));

    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(lookup_package))
        .nest("/api", status_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn result(archive: &str, error: Option<&str>) -> RefreshResult {
        RefreshResult {
            archive: archive.to_string(),
            started_at: Utc::now(),
            duration: Duration::from_millis(250),
            records: 3,
            pockets_replaced: 1,
            pockets_unchanged: 0,
            error: error.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_status_board_keeps_configuration_order() {
        let board = StatusBoard::new(vec!["ubuntu".to_string(), "debian".to_string()]);
        board.record(result("debian", Some("boom"))).await;

        let status = board.snapshot().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].archive, "ubuntu");
        assert!(status[0].last_refresh.is_none());
        assert_eq!(
            status[1].last_refresh.as_ref().and_then(|r| r.error.as_deref()),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_status_board_keeps_latest_only() {
        let board = StatusBoard::new(vec!["ubuntu".to_string()]);
        board.record(result("ubuntu", Some("first"))).await;
        board.record(result("ubuntu", None)).await;

        let status = board.snapshot().await;
        assert!(status[0].last_refresh.as_ref().unwrap().is_success());
    }
}
