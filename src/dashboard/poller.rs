//! Fixed-interval polling of the range-query API.
//!
//! Each cycle queries every metric of every group plus the two scatter
//! metrics over a trailing window, then folds all responses into shared
//! state under a single write lock. Cycles never overlap: a cycle requested
//! while another is still in flight is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::assembler::{apply_scatter, assemble, CycleReport, RoleResponses, ScatterAxis};
use super::client::{FetchError, FetchResponse, MetricsSource};
use super::data::DashboardState;
use super::query::{build_query_uri, QueryWindow, DEFAULT_LOOKBACK_MINUTES, DEFAULT_STEP_SECS};
use crate::config::{MetricCatalog, MetricDefinition, MetricGroup};

/// Default metrics API endpoint (in-cluster service).
pub const DEFAULT_API_URL: &str = "http://foremast-api-service.foremast.svc.cluster.local:8099";

/// Dashboard state shared between the poller and the HTTP server.
pub type SharedState = Arc<RwLock<DashboardState>>;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base URL of the metrics API, without the query path.
    pub api_url: String,
    /// Time between cycle starts.
    pub interval: Duration,
    /// How far back each query reaches.
    pub lookback: chrono::Duration,
    /// Query resolution; also the anomaly join window.
    pub step_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            interval: Duration::from_secs(DEFAULT_STEP_SECS),
            lookback: chrono::Duration::minutes(DEFAULT_LOOKBACK_MINUTES),
            step_secs: DEFAULT_STEP_SECS,
        }
    }
}

/// Result of asking for a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(CycleReport),
    /// Another cycle was still in flight; nothing was fetched.
    Skipped,
}

/// Drives poll cycles against a `MetricsSource`.
pub struct Poller<S> {
    source: S,
    catalog: Arc<MetricCatalog>,
    state: SharedState,
    config: PollerConfig,
    in_flight: Mutex<()>,
}

impl<S: MetricsSource> Poller<S> {
    pub fn new(
        source: S,
        catalog: Arc<MetricCatalog>,
        state: SharedState,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            catalog,
            state,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Run one cycle over the window ending now, unless one is in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Poll cycle still in flight, skipping");
            metrics::counter!("dashboard_poll_skipped_total").increment(1);
            return PollOutcome::Skipped;
        };

        let window = QueryWindow::trailing(Utc::now(), self.config.lookback, self.config.step_secs);
        PollOutcome::Completed(self.poll_window(&window).await)
    }

    /// Poll every `interval` until `shutdown` changes or its sender is dropped.
    ///
    /// The first cycle starts immediately. Ticks missed while a slow cycle
    /// runs are dropped rather than replayed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            api_url = %self.config.api_url,
            interval_ms = self.config.interval.as_millis() as u64,
            groups = self.catalog.groups.len(),
            "Poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Poller stopped");
    }

    async fn poll_window(&self, window: &QueryWindow) -> CycleReport {
        let started = Instant::now();

        let group_fetches = self
            .catalog
            .groups
            .iter()
            .map(|group| self.fetch_group(group, window));
        let (groups, x, y) = tokio::join!(
            join_all(group_fetches),
            self.fetch_optional(self.catalog.scatter_x(), window),
            self.fetch_optional(self.catalog.scatter_y(), window),
        );
        let responses: HashMap<String, RoleResponses> = groups.into_iter().collect();

        let mut state = self.state.write().await;
        let mut report = assemble(&mut state, &self.catalog, responses, window.step_ms());
        if let Some(response) = x {
            report.merge(apply_scatter(&mut state, ScatterAxis::X, response));
        }
        if let Some(response) = y {
            report.merge(apply_scatter(&mut state, ScatterAxis::Y, response));
        }
        state.poll.cycles += 1;
        state.poll.last_completed_ms = Some(Utc::now().timestamp_millis());
        let cycle = state.poll.cycles;
        drop(state);

        metrics::counter!("dashboard_poll_cycles_total").increment(1);
        metrics::gauge!("dashboard_anomaly_points").set(report.anomaly_points as f64);

        info!(
            cycle,
            applied = report.applied,
            empty = report.empty,
            failed = report.failed,
            anomaly_points = report.anomaly_points,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Poll cycle complete"
        );

        report
    }

    /// Fetch all roles of a group concurrently.
    async fn fetch_group(&self, group: &MetricGroup, window: &QueryWindow) -> (String, RoleResponses) {
        let fetches = group.metrics.iter().map(move |metric| async move {
            (metric.role, self.fetch_metric(metric, window).await)
        });
        let responses: RoleResponses = join_all(fetches).await.into_iter().collect();
        (group.key.clone(), responses)
    }

    async fn fetch_optional(
        &self,
        metric: Option<&MetricDefinition>,
        window: &QueryWindow,
    ) -> Option<Result<FetchResponse, FetchError>> {
        match metric {
            Some(metric) => Some(self.fetch_metric(metric, window).await),
            None => None,
        }
    }

    async fn fetch_metric(
        &self,
        metric: &MetricDefinition,
        window: &QueryWindow,
    ) -> Result<FetchResponse, FetchError> {
        let uri = build_query_uri(&self.config.api_url, metric, window);
        debug!(uri = %uri, role = %metric.role, "Fetching");
        self.source.fetch(&uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::data::Workload;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned bodies keyed by query expression.
    struct CannedSource {
        bodies: HashMap<String, FetchResponse>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CannedSource {
        fn new(delay: Duration) -> Self {
            Self {
                bodies: HashMap::new(),
                delay,
                calls: AtomicUsize::new(0),
            }
        }

        fn with(mut self, expression: &str, values: serde_json::Value) -> Self {
            let payload = json!({"data": {"result": [{"metric": {"__name__": expression}, "values": values}]}});
            self.bodies.insert(
                expression.to_string(),
                FetchResponse {
                    status: 200,
                    body: serde_json::to_string(&payload.to_string()).unwrap(),
                },
            );
            self
        }
    }

    impl MetricsSource for CannedSource {
        async fn fetch(&self, uri: &str) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let encoded = uri
                .split_once("query=")
                .and_then(|(_, rest)| rest.split('&').next())
                .unwrap_or_default();
            let expression = urlencoding::decode(encoded).unwrap().into_owned();
            match self.bodies.get(&expression) {
                Some(response) => Ok(response.clone()),
                None => Ok(FetchResponse {
                    status: 404,
                    body: String::new(),
                }),
            }
        }
    }

    fn catalog() -> Arc<MetricCatalog> {
        Arc::new(MetricCatalog::from_yaml_str(
            r#"
groups:
  - key: latency
    common_name: Latency
    scale: 1000
    metrics:
      - {name: lat, role: base}
      - {name: lat_upper, role: upper}
      - {name: lat_lower, role: lower}
      - {name: lat_anomaly, role: anomaly}
  - key: errors
    common_name: Errors
    metrics:
      - {name: err, role: base}
scatter:
  x: latency
  y: errors
"#,
        )
        .unwrap())
    }

    fn poller(source: CannedSource) -> Poller<CannedSource> {
        let catalog = catalog();
        let state = Arc::new(RwLock::new(DashboardState::new(
            &catalog,
            Workload::new("ns", "app"),
        )));
        Poller::new(
            source,
            catalog,
            state,
            PollerConfig {
                api_url: "http://metrics.test".to_string(),
                interval: Duration::from_millis(20),
                ..PollerConfig::default()
            },
        )
    }

    fn full_source(delay: Duration) -> CannedSource {
        CannedSource::new(delay)
            .with("lat", json!([[0, "0.001"], [1, "0.002"], [16, "0.003"]]))
            .with("lat_upper", json!([[0, "0.004"]]))
            .with("lat_lower", json!([[0, "0.0005"]]))
            .with("lat_anomaly", json!([[30, "15"], [45, "15"]]))
            .with("err", json!([[0, "2"], [15, "3"]]))
    }

    #[tokio::test]
    async fn test_poll_once_assembles_state() {
        let poller = poller(full_source(Duration::ZERO));

        let outcome = poller.poll_once().await;
        let PollOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle, got {:?}", outcome);
        };
        assert_eq!(report.failed, 0);
        assert_eq!(report.anomaly_points, 1);
        // 5 group metrics + 2 scatter fetches
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 7);

        let state = poller.state();
        let state = state.read().await;
        assert_eq!(state.base["latency"].data.len(), 3);
        assert_eq!(state.base["latency"].data[1].value, 2.0);
        assert_eq!(state.anomaly["latency"].data[0].time_ms, 1000);
        assert_eq!(state.base["errors"].data[1].value, 3.0);
        // errors has no bound or anomaly metrics; its slots stay present and empty
        assert!(state.upper["errors"].is_empty());
        assert!(state.anomaly["errors"].is_empty());
        assert_eq!(state.x.data[0].value, 1.0);
        assert_eq!(state.y.data[1].value, 3.0);
        assert_eq!(state.poll.cycles, 1);
        assert!(state.poll.last_completed_ms.is_some());
    }

    #[tokio::test]
    async fn test_overlapping_poll_is_skipped() {
        let poller = poller(full_source(Duration::from_millis(50)));

        let (first, second) = tokio::join!(poller.poll_once(), poller.poll_once());

        assert!(matches!(first, PollOutcome::Completed(_)));
        assert_eq!(second, PollOutcome::Skipped);
        assert_eq!(poller.source.calls.load(Ordering::SeqCst), 7);
        assert_eq!(poller.state().read().await.poll.cycles, 1);
    }

    #[tokio::test]
    async fn test_missing_metrics_keep_previous_state() {
        let poller = poller(full_source(Duration::ZERO));
        poller.poll_once().await;
        let before = poller.state().read().await.clone();

        // Swap in a source where every query 404s
        let failing = Poller::new(
            CannedSource::new(Duration::ZERO),
            catalog(),
            poller.state(),
            poller.config.clone(),
        );
        let PollOutcome::Completed(report) = failing.poll_once().await else {
            panic!("expected a completed cycle");
        };
        assert_eq!(report.failed, 7);

        let after = poller.state().read().await.clone();
        assert_eq!(after.base, before.base);
        assert_eq!(after.anomaly, before.anomaly);
        assert_eq!(after.x, before.x);
        assert_eq!(after.poll.cycles, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let poller = Arc::new(poller(full_source(Duration::ZERO)));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller should stop after shutdown")
            .unwrap();

        let cycles = poller.state().read().await.poll.cycles;
        assert!(cycles >= 2, "expected repeated cycles, got {}", cycles);
    }

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.lookback, chrono::Duration::minutes(15));
        assert_eq!(config.step_secs, 15);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }
}
