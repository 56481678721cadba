//! Anomaly marker alignment.
//!
//! Anomaly metrics report *when* an anomaly happened rather than a magnitude:
//! each sample's value is an epoch-seconds timestamp. To draw markers on top
//! of the measured line, every anomaly timestamp is mapped onto the base
//! series points that precede it by less than one sampling step.

use std::collections::HashSet;

use super::data::SeriesPoint;
use super::response::RawSample;

/// Unique anomaly timestamps (millis) in order of first appearance.
///
/// Samples whose value has no leading integer are skipped.
pub fn anomaly_timestamps(values: &[RawSample]) -> Vec<i64> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter_map(|(_, value)| value.parse_int())
        .map(|secs| secs.saturating_mul(1000))
        .filter(|ts| seen.insert(*ts))
        .collect()
}

/// Base points lying strictly within one step before each anomaly timestamp.
///
/// For every timestamp `t`, every point `p` with `0 < t - p.time_ms < step_ms`
/// is emitted, in base order, so one anomaly can contribute zero, one or
/// several points. Output points are always copies of base points.
pub fn join_anomalies(base: &[SeriesPoint], anomaly_ts: &[i64], step_ms: i64) -> Vec<SeriesPoint> {
    let mut joined = Vec::new();
    for &ts in anomaly_ts {
        for point in base {
            let diff = ts - point.time_ms;
            if diff > 0 && diff < step_ms {
                joined.push(*point);
            }
        }
    }
    joined
}
