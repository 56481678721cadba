//! Headless anomaly dashboard for the foremast metrics API.
//!
//! The service polls a Prometheus-compatible `query_range` endpoint for a
//! catalog of metric groups (latency, 5xx errors, CPU, memory, pods by
//! version). Each group has a measured series, optional upper and lower bounds,
//! and anomaly markers aligned onto the measured series. The assembled state is
//! served as JSON for a chart front end.
//!
//! ## Architecture
//!
//! 1. **Metric Catalog** (`config` module) - The static group map, built in or
//!    loaded from YAML.
//!
//! 2. **Poller** (`dashboard::poller`) - Queries every metric on a fixed
//!    interval and folds the results into shared state.
//!
//! 3. **API** (`dashboard::server`) - Serves state snapshots over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! foremast-dashboard \
//!   --api-url http://localhost:8099 \
//!   --namespace foremast-examples \
//!   --app foo \
//!   --port 8060
//! ```

pub mod config;
pub mod dashboard;
