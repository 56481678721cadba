//! HTTP server and API handlers for the dashboard.
//!
//! GET /api/health - liveness.
//! GET /api/groups - the metric catalog.
//! GET /api/dashboard - every chart for the configured workload.
//! GET /api/dashboard/:namespace/:app - the same charts, labeled for another workload.
//! GET /api/series/:group - one group's four series.
//! GET /api/scatter - the scatter pair.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::data::{DashboardState, PollInfo, Series, Workload};
use super::poller::SharedState;
use crate::config::{MetricCatalog, MetricGroup, MetricRole};

/// Application state shared across handlers.
pub struct AppState {
    pub catalog: Arc<MetricCatalog>,
    pub state: SharedState,
}

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8060 }
    }
}

/// One chart: a group's series under its display title.
#[derive(Debug, Clone, Serialize)]
pub struct ChartView {
    pub key: String,
    pub title: String,
    pub unit: String,
    pub base: Series,
    pub upper: Series,
    pub lower: Series,
    pub anomaly: Series,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterView {
    pub x: Series,
    pub y: Series,
}

/// Everything a front end needs to draw the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub workload: Workload,
    pub charts: Vec<ChartView>,
    pub scatter: ScatterView,
    pub poll: PollInfo,
}

impl ChartView {
    fn build(state: &DashboardState, group: &MetricGroup, workload: &Workload) -> Self {
        let series = |role| state.series(role, &group.key).cloned().unwrap_or_default();
        Self {
            key: group.key.clone(),
            title: workload.chart_title(&group.common_name),
            unit: group.unit.clone(),
            base: series(MetricRole::Base),
            upper: series(MetricRole::Upper),
            lower: series(MetricRole::Lower),
            anomaly: series(MetricRole::Anomaly),
        }
    }
}

impl DashboardView {
    /// Snapshot `state` with charts in catalog order, titled for `workload`.
    pub fn build(state: &DashboardState, catalog: &MetricCatalog, workload: Workload) -> Self {
        let charts = catalog
            .groups
            .iter()
            .map(|group| ChartView::build(state, group, &workload))
            .collect();

        Self {
            charts,
            scatter: ScatterView {
                x: state.x.clone(),
                y: state.y.clone(),
            },
            poll: state.poll.clone(),
            workload,
        }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/groups", get(groups_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/dashboard/:namespace/:app", get(workload_dashboard_handler))
        .route("/api/series/:group", get(series_handler))
        .route("/api/scatter", get(scatter_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` resolves.
pub async fn run_server<F>(state: Arc<AppState>, config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, "Dashboard API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Dashboard API server failed")?;

    info!("Dashboard API stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn groups_handler(State(state): State<Arc<AppState>>) -> Json<Vec<MetricGroup>> {
    Json(state.catalog.groups.clone())
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Json<DashboardView> {
    let snapshot = state.state.read().await;
    let workload = snapshot.workload.clone();
    Json(DashboardView::build(&snapshot, &state.catalog, workload))
}

/// Path segments only change the labels; the data is the same for every workload.
async fn workload_dashboard_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, app)): Path<(String, String)>,
) -> Json<DashboardView> {
    let snapshot = state.state.read().await;
    Json(DashboardView::build(
        &snapshot,
        &state.catalog,
        Workload::new(namespace, app),
    ))
}

async fn series_handler(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let Some(group) = state.catalog.group(&key) else {
        return (StatusCode::NOT_FOUND, format!("Metric group not found: {}", key)).into_response();
    };

    let snapshot = state.state.read().await;
    Json(ChartView::build(&snapshot, group, &snapshot.workload)).into_response()
}

async fn scatter_handler(State(state): State<Arc<AppState>>) -> Json<ScatterView> {
    let snapshot = state.state.read().await;
    Json(ScatterView {
        x: snapshot.x.clone(),
        y: snapshot.y.clone(),
    })
}
