//! Folding fetched query results into dashboard state.
//!
//! Base, upper and lower results are scaled by their group's factor and
//! replace the group's slot. Anomaly results are joined against the group's
//! base series as it stands in state, so base must be applied first.
//! Failed fetches leave the previous series in place.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::anomaly::{anomaly_timestamps, join_anomalies};
use super::client::{FetchError, FetchResponse};
use super::data::{DashboardState, Series, SeriesPoint, SeriesStyle};
use super::response::{parse_response, Decoded, RangeResult};
use crate::config::{MetricCatalog, MetricGroup, MetricRole};

/// Fetch outcome per role for one group. Roles a group does not define are absent.
pub type RoleResponses = HashMap<MetricRole, Result<FetchResponse, FetchError>>;

/// Scatter plot axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterAxis {
    X,
    Y,
}

/// Per-slot tally of what a fold did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Slots replaced with a non-empty series.
    pub applied: usize,
    /// Slots replaced with an empty series (empty or malformed payload).
    pub empty: usize,
    /// Slots left untouched because the fetch failed.
    pub failed: usize,
    /// Points placed in anomaly series.
    pub anomaly_points: usize,
}

impl CycleReport {
    pub fn merge(&mut self, other: CycleReport) {
        self.applied += other.applied;
        self.empty += other.empty;
        self.failed += other.failed;
        self.anomaly_points += other.anomaly_points;
    }

    fn record(&mut self, series: &Series) {
        if series.is_empty() {
            self.empty += 1;
        } else {
            self.applied += 1;
        }
    }
}

/// Convert raw samples to `(ts * 1000, scale * value)` points.
pub fn scaled_points(result: &RangeResult, scale: f64) -> Vec<SeriesPoint> {
    result
        .values
        .iter()
        .map(|(ts, value)| SeriesPoint::new(to_millis(*ts), scale * value.parse_float()))
        .collect()
}

/// Base/upper/lower series for a group with the given scale.
pub fn scaled_series(result: &RangeResult, scale: f64) -> Series {
    Series::new(result.name(), scaled_points(result, scale))
}

/// Anomaly marker series joined against `base`.
pub fn anomaly_series(result: &RangeResult, base: &[SeriesPoint], step_ms: i64) -> Series {
    let timestamps = anomaly_timestamps(&result.values);
    let data = join_anomalies(base, &timestamps, step_ms);
    Series::new(result.name(), data).with_style(SeriesStyle::anomaly())
}

/// Scatter series: x values are scaled by 1000, y values are used as-is.
pub fn scatter_series(result: &RangeResult, axis: ScatterAxis) -> Series {
    let scale = match axis {
        ScatterAxis::X => 1000.0,
        ScatterAxis::Y => 1.0,
    };
    scaled_series(result, scale)
}

fn to_millis(ts_secs: f64) -> i64 {
    (ts_secs * 1000.0).round() as i64
}

/// Accept a response and reduce it to a result, logging why it was dropped
/// or substituted. `None` means the slot must not be touched.
fn accept(
    group: &str,
    role: &str,
    response: Result<FetchResponse, FetchError>,
    report: &mut CycleReport,
) -> Option<RangeResult> {
    match response.and_then(|r| parse_response(&r)) {
        Ok(Decoded::Malformed(reason)) => {
            warn!(group = %group, role = %role, reason = %reason, "Malformed payload, substituting empty series");
            Some(RangeResult::default())
        }
        Ok(decoded) => Some(decoded.into_result()),
        Err(e) => {
            warn!(group = %group, role = %role, error = %e, "Dropping failed fetch");
            metrics::counter!("dashboard_fetch_failures_total").increment(1);
            report.failed += 1;
            None
        }
    }
}

/// Fold one group's responses into `state`.
///
/// Base, upper and lower are applied before the anomaly join reads the
/// group's base series, so anomalies align with this cycle's base data when
/// the base fetch succeeded and with the previous base data otherwise.
pub fn apply_group(
    state: &mut DashboardState,
    group: &MetricGroup,
    mut responses: RoleResponses,
    step_ms: i64,
) -> CycleReport {
    let mut report = CycleReport::default();

    for role in [MetricRole::Base, MetricRole::Upper, MetricRole::Lower] {
        let Some(response) = responses.remove(&role) else {
            continue;
        };
        if let Some(result) = accept(&group.key, role.as_str(), response, &mut report) {
            let series = scaled_series(&result, group.scale);
            debug!(group = %group.key, role = %role, points = series.data.len(), "Replacing series");
            report.record(&series);
            state.replace(role, &group.key, series);
        }
    }

    if let Some(response) = responses.remove(&MetricRole::Anomaly) {
        if let Some(result) = accept(&group.key, MetricRole::Anomaly.as_str(), response, &mut report) {
            let base = state
                .series(MetricRole::Base, &group.key)
                .map(|s| s.data.as_slice())
                .unwrap_or(&[]);
            let series = anomaly_series(&result, base, step_ms);
            debug!(group = %group.key, points = series.data.len(), "Replacing anomaly series");
            report.anomaly_points += series.data.len();
            report.record(&series);
            state.replace(MetricRole::Anomaly, &group.key, series);
        }
    }

    report
}

/// Fold a scatter axis response into `state`.
pub fn apply_scatter(
    state: &mut DashboardState,
    axis: ScatterAxis,
    response: Result<FetchResponse, FetchError>,
) -> CycleReport {
    let mut report = CycleReport::default();
    let label = match axis {
        ScatterAxis::X => "scatter_x",
        ScatterAxis::Y => "scatter_y",
    };

    if let Some(result) = accept("scatter", label, response, &mut report) {
        let series = scatter_series(&result, axis);
        report.record(&series);
        match axis {
            ScatterAxis::X => state.x = series,
            ScatterAxis::Y => state.y = series,
        }
    }

    report
}

/// Fold a whole cycle of group responses into `state`, in catalog order.
///
/// Groups missing from `responses` keep their previous series.
pub fn assemble(
    state: &mut DashboardState,
    catalog: &MetricCatalog,
    mut responses: HashMap<String, RoleResponses>,
    step_ms: i64,
) -> CycleReport {
    let mut report = CycleReport::default();
    for group in &catalog.groups {
        if let Some(group_responses) = responses.remove(&group.key) {
            report.merge(apply_group(state, group, group_responses, step_ms));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricDefinition, ScatterSources};
    use crate::dashboard::data::Workload;
    use proptest::prelude::*;
    use serde_json::json;

    const STEP_MS: i64 = 15_000;

    fn group(key: &str, scale: f64) -> MetricGroup {
        MetricGroup {
            key: key.to_string(),
            common_name: key.to_string(),
            unit: String::new(),
            scale,
            metrics: vec![
                MetricDefinition::new(format!("{key}_base"), "", MetricRole::Base),
                MetricDefinition::new(format!("{key}_upper"), "", MetricRole::Upper),
                MetricDefinition::new(format!("{key}_lower"), "", MetricRole::Lower),
                MetricDefinition::new(format!("{key}_anomaly"), "", MetricRole::Anomaly),
            ],
        }
    }

    fn catalog() -> MetricCatalog {
        MetricCatalog {
            groups: vec![group("latency", 1000.0), group("cpu", 1.0)],
            scatter: ScatterSources {
                x: "latency".to_string(),
                y: "cpu".to_string(),
            },
        }
    }

    fn body(name: &str, values: serde_json::Value) -> Result<FetchResponse, FetchError> {
        let payload = json!({"data": {"result": [{"metric": {"__name__": name}, "values": values}]}});
        Ok(FetchResponse {
            status: 200,
            body: serde_json::to_string(&payload.to_string()).unwrap(),
        })
    }

    fn failed() -> Result<FetchResponse, FetchError> {
        Ok(FetchResponse {
            status: 503,
            body: String::new(),
        })
    }

    fn full_responses() -> RoleResponses {
        HashMap::from([
            (MetricRole::Base, body("base", json!([[0, "0.001"], [1, "0.002"], [16, "0.003"]]))),
            (MetricRole::Upper, body("upper", json!([[0, "0.005"]]))),
            (MetricRole::Lower, body("lower", json!([[0, "0.0"]]))),
            (MetricRole::Anomaly, body("anomaly", json!([[15, "15"], [16, "15"]]))),
        ])
    }

    #[test]
    fn test_scaled_points() {
        let result = decode(json!([[1, "2.5"], [2.5, "4"]]));
        assert_eq!(
            scaled_points(&result, 10.0),
            vec![SeriesPoint::new(1000, 25.0), SeriesPoint::new(2500, 40.0)]
        );
    }

    fn decode(values: serde_json::Value) -> RangeResult {
        let Ok(response) = body("m", values) else {
            unreachable!()
        };
        parse_response(&response).unwrap().into_result()
    }

    #[test]
    fn test_apply_group_fills_all_roles() {
        let catalog = catalog();
        let latency = catalog.group("latency").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());

        let report = apply_group(&mut state, latency, full_responses(), STEP_MS);

        assert_eq!(report.applied, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(
            state.base["latency"].data,
            vec![
                SeriesPoint::new(0, 1.0),
                SeriesPoint::new(1000, 2.0),
                SeriesPoint::new(16000, 3.0),
            ]
        );
        assert_eq!(state.base["latency"].name.as_deref(), Some("base"));
        assert_eq!(state.upper["latency"].data, vec![SeriesPoint::new(0, 5.0)]);
        assert_eq!(state.lower["latency"].data, vec![SeriesPoint::new(0, 0.0)]);

        // Anomaly at 15s joins to the base point at 1s (14s earlier).
        let anomaly = &state.anomaly["latency"];
        assert_eq!(anomaly.data, vec![SeriesPoint::new(1000, 2.0)]);
        assert_eq!(anomaly.style, Some(SeriesStyle::anomaly()));
        assert_eq!(report.anomaly_points, 1);

        // Other group untouched
        assert!(state.base["cpu"].is_empty());
    }

    #[test]
    fn test_anomaly_values_are_not_scaled() {
        let catalog = catalog();
        let latency = catalog.group("latency").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());
        apply_group(&mut state, latency, full_responses(), STEP_MS);

        // Anomaly points carry the already-scaled base values, not a second scaling
        for point in &state.anomaly["latency"].data {
            assert!(state.base["latency"].data.contains(point));
        }
    }

    #[test]
    fn test_failed_fetch_keeps_previous_series() {
        let catalog = catalog();
        let latency = catalog.group("latency").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());
        apply_group(&mut state, latency, full_responses(), STEP_MS);
        let before = state.clone();

        let responses = HashMap::from([
            (MetricRole::Base, failed()),
            (MetricRole::Upper, failed()),
            (MetricRole::Lower, failed()),
            (MetricRole::Anomaly, failed()),
        ]);
        let report = apply_group(&mut state, latency, responses, STEP_MS);

        assert_eq!(report.failed, 4);
        assert_eq!(report.applied, 0);
        assert_eq!(state, before);
    }

    #[test]
    fn test_anomaly_uses_previous_base_when_base_fails() {
        let catalog = catalog();
        let latency = catalog.group("latency").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());
        apply_group(&mut state, latency, full_responses(), STEP_MS);

        let responses = HashMap::from([
            (MetricRole::Base, failed()),
            (MetricRole::Anomaly, body("anomaly", json!([[20, "17"]]))),
        ]);
        apply_group(&mut state, latency, responses, STEP_MS);

        // Joined against the previous base: 17s is 1s after the 16s point, 16s after the 1s point
        assert_eq!(state.anomaly["latency"].data, vec![SeriesPoint::new(16000, 3.0)]);
    }

    #[test]
    fn test_anomaly_without_base_is_empty() {
        let catalog = catalog();
        let cpu = catalog.group("cpu").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());

        let responses = HashMap::from([(MetricRole::Anomaly, body("anomaly", json!([[20, "17"]])))]);
        let report = apply_group(&mut state, cpu, responses, STEP_MS);

        assert!(state.anomaly["cpu"].is_empty());
        assert_eq!(state.anomaly["cpu"].style, Some(SeriesStyle::anomaly()));
        assert_eq!(report.empty, 1);
    }

    #[test]
    fn test_empty_and_malformed_payloads_clear_slot() {
        let catalog = catalog();
        let latency = catalog.group("latency").unwrap();
        let mut state = DashboardState::new(&catalog, Workload::default());
        apply_group(&mut state, latency, full_responses(), STEP_MS);

        let empty = Ok(FetchResponse {
            status: 200,
            body: json!({"data": {"result": []}}).to_string(),
        });
        let malformed = Ok(FetchResponse {
            status: 200,
            body: "<html>gateway</html>".to_string(),
        });
        let responses = HashMap::from([(MetricRole::Base, empty), (MetricRole::Upper, malformed)]);
        let report = apply_group(&mut state, latency, responses, STEP_MS);

        assert_eq!(report.empty, 2);
        assert!(state.base["latency"].is_empty());
        assert_eq!(state.base["latency"].name, None);
        assert!(state.upper["latency"].is_empty());
        // Lower was not part of this fold
        assert_eq!(state.lower["latency"].data.len(), 1);
    }

    #[test]
    fn test_scatter_scaling() {
        let catalog = catalog();
        let mut state = DashboardState::new(&catalog, Workload::default());

        apply_scatter(&mut state, ScatterAxis::X, body("latency", json!([[2, "0.25"]])));
        apply_scatter(&mut state, ScatterAxis::Y, body("errors", json!([[2, "3"]])));

        assert_eq!(state.x.data, vec![SeriesPoint::new(2000, 250.0)]);
        assert_eq!(state.x.name.as_deref(), Some("latency"));
        assert_eq!(state.y.data, vec![SeriesPoint::new(2000, 3.0)]);
        assert!(state.x.style.is_none());
    }

    #[test]
    fn test_assemble_retains_groups_absent_from_responses() {
        let catalog = catalog();
        let mut state = DashboardState::new(&catalog, Workload::default());

        let first = HashMap::from([
            ("latency".to_string(), full_responses()),
            ("cpu".to_string(), full_responses()),
        ]);
        assemble(&mut state, &catalog, first, STEP_MS);
        let cpu_before = state.base["cpu"].clone();

        let second = HashMap::from([(
            "latency".to_string(),
            HashMap::from([(MetricRole::Base, body("base", json!([[100, "1"]])))]),
        )]);
        let report = assemble(&mut state, &catalog, second, STEP_MS);

        assert_eq!(report.applied, 1);
        assert_eq!(state.base["latency"].data, vec![SeriesPoint::new(100_000, 1000.0)]);
        assert_eq!(state.base["cpu"], cpu_before);
    }

    #[test]
    fn test_assemble_ignores_unknown_groups() {
        let catalog = catalog();
        let mut state = DashboardState::new(&catalog, Workload::default());
        let responses = HashMap::from([("memory".to_string(), full_responses())]);

        let report = assemble(&mut state, &catalog, responses, STEP_MS);

        assert_eq!(report, CycleReport::default());
        assert!(!state.base.contains_key("memory"));
    }

    proptest! {
        #[test]
        fn prop_scaling_is_linear(
            raw in proptest::collection::vec((0u32..100_000, -1.0e6f64..1.0e6), 0..30),
            scale in 0.001f64..10_000.0,
        ) {
            let values: Vec<_> = raw
                .iter()
                .map(|(ts, v)| json!([ts, v.to_string()]))
                .collect();
            let result = decode(serde_json::Value::Array(values));
            let points = scaled_points(&result, scale);

            prop_assert_eq!(points.len(), raw.len());
            for (point, (ts, v)) in points.iter().zip(raw.iter()) {
                prop_assert_eq!(point.time_ms, *ts as i64 * 1000);
                prop_assert!((point.value - scale * v).abs() <= 1e-9 * (scale * v).abs().max(1.0));
            }
        }
    }
}
