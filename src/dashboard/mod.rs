//! Dashboard polling and serving.
//!
//! # Architecture
//!
//! - `data` - Core data types (SeriesPoint, Series, DashboardState)
//! - `query` - Range-query URI construction
//! - `response` - Transport check and double-encoded payload decoding
//! - `anomaly` - Anomaly timestamp alignment against the base series
//! - `assembler` - Folding query results into dashboard state
//! - `client` - `MetricsSource` trait and its reqwest implementation
//! - `poller` - Fixed-interval poll loop with an in-flight guard
//! - `server` - HTTP API over state snapshots

pub mod anomaly;
pub mod assembler;
pub mod client;
pub mod data;
pub mod poller;
pub mod query;
pub mod response;
pub mod server;

pub use client::{FetchError, FetchResponse, HttpMetricsSource, MetricsSource};
pub use data::{DashboardState, Series, SeriesPoint, Workload};
pub use poller::{PollOutcome, Poller, PollerConfig, SharedState};
pub use server::{router, run_server, AppState, ServerConfig};
