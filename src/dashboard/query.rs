//! Range-query URI construction.
//!
//! Queries take the form
//! `{domain}/api/v1/query_range?query=<expr>&start=<s>&end=<s>&step=<s>`
//! where `<expr>` is the percent-encoded metric name followed by its tag
//! selector.

use chrono::{DateTime, Duration, Utc};

use crate::config::MetricDefinition;

/// Path of the range-query endpoint on the metrics API.
pub const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// Sampling step requested from the API, also the anomaly join window.
pub const DEFAULT_STEP_SECS: u64 = 15;

/// How far back each poll looks.
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 15;

/// Time window and resolution for a range query, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: i64,
    pub end: i64,
    pub step_secs: u64,
}

impl QueryWindow {
    /// Window ending at `now` and reaching back `lookback`.
    pub fn trailing(now: DateTime<Utc>, lookback: Duration, step_secs: u64) -> Self {
        let end = now.timestamp();
        Self {
            start: end - lookback.num_seconds(),
            end,
            step_secs,
        }
    }

    /// Step length in milliseconds.
    pub fn step_ms(&self) -> i64 {
        self.step_secs as i64 * 1000
    }
}

/// Build the range-query URI for `metric` over `window`.
///
/// The metric name and tags are not validated; a malformed selector only
/// surfaces as an API-side query error.
pub fn build_query_uri(domain: &str, metric: &MetricDefinition, window: &QueryWindow) -> String {
    format!(
        "{}{}?query={}&start={}&end={}&step={}",
        domain.trim_end_matches('/'),
        QUERY_RANGE_PATH,
        urlencoding::encode(&metric.expression()),
        window.start,
        window.end,
        window.step_secs
    )
}
