//! Core data types for the dashboard.
//!
//! These types are shared between the assembler, the poller and the HTTP server.

use std::collections::HashMap;

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

use crate::config::{MetricCatalog, MetricRole};

/// A single timeseries data point.
///
/// Serialized as a `[time_ms, value]` pair, the shape chart libraries consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

impl Serialize for SeriesPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.time_ms)?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Marker options for a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerStyle {
    pub enabled: bool,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverStyle {
    pub line_width_plus: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateStyles {
    pub hover: HoverStyle,
}

/// Display attributes carried by anomaly series only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStyle {
    pub color: String,
    pub marker: MarkerStyle,
    pub line_width: u32,
    pub states: StateStyles,
}

impl SeriesStyle {
    /// Red circular markers with no connecting line.
    pub fn anomaly() -> Self {
        Self {
            color: "#FF0000".to_string(),
            marker: MarkerStyle {
                enabled: true,
                symbol: "circle".to_string(),
            },
            line_width: 0,
            states: StateStyles {
                hover: HoverStyle { line_width_plus: 0 },
            },
        }
    }
}

/// A named, chronologically ordered run of points.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub name: Option<String>,
    pub data: Vec<SeriesPoint>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub style: Option<SeriesStyle>,
}

impl Series {
    pub fn new(name: Option<String>, data: Vec<SeriesPoint>) -> Self {
        Self {
            name,
            data,
            style: None,
        }
    }

    pub fn with_style(mut self, style: SeriesStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Workload whose metrics are displayed. Used for labels only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub namespace: String,
    pub app_name: String,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            app_name: app_name.into(),
        }
    }

    /// Chart title in the form `namespace : app : common name`.
    pub fn chart_title(&self, common_name: &str) -> String {
        format!("{} : {} : {}", self.namespace, self.app_name, common_name)
    }
}

/// Bookkeeping about the most recent poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollInfo {
    /// Number of completed poll cycles.
    pub cycles: u64,
    /// When the last cycle finished (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_ms: Option<i64>,
}

/// All series the dashboard renders.
///
/// Every catalog group key has an entry in each of the four role maps; a
/// group without data holds an empty series, never a missing key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardState {
    pub base: HashMap<String, Series>,
    pub upper: HashMap<String, Series>,
    pub lower: HashMap<String, Series>,
    pub anomaly: HashMap<String, Series>,
    pub x: Series,
    pub y: Series,
    pub workload: Workload,
    pub poll: PollInfo,
}

impl DashboardState {
    /// Fresh state with an empty series for every group in `catalog`.
    pub fn new(catalog: &MetricCatalog, workload: Workload) -> Self {
        let empty = || -> HashMap<String, Series> {
            catalog
                .keys()
                .map(|key| (key.to_string(), Series::default()))
                .collect()
        };

        Self {
            base: empty(),
            upper: empty(),
            lower: empty(),
            anomaly: empty(),
            x: Series::default(),
            y: Series::default(),
            workload,
            poll: PollInfo::default(),
        }
    }

    pub fn role_map(&self, role: MetricRole) -> &HashMap<String, Series> {
        match role {
            MetricRole::Base => &self.base,
            MetricRole::Upper => &self.upper,
            MetricRole::Lower => &self.lower,
            MetricRole::Anomaly => &self.anomaly,
        }
    }

    pub fn role_map_mut(&mut self, role: MetricRole) -> &mut HashMap<String, Series> {
        match role {
            MetricRole::Base => &mut self.base,
            MetricRole::Upper => &mut self.upper,
            MetricRole::Lower => &mut self.lower,
            MetricRole::Anomaly => &mut self.anomaly,
        }
    }

    /// Series for `key` in the `role` map.
    pub fn series(&self, role: MetricRole, key: &str) -> Option<&Series> {
        self.role_map(role).get(key)
    }

    /// Replace the series for `key` in the `role` map.
    pub fn replace(&mut self, role: MetricRole, key: &str, series: Series) {
        self.role_map_mut(role).insert(key.to_string(), series);
    }
}
