//! Metric catalog: the static map of metric groups the dashboard polls.
//!
//! Each group owns one base metric and optionally an upper bound, a lower
//! bound and an anomaly marker metric, all sharing a scale factor and display
//! unit. The catalog is built in, or loaded from a YAML file of the form:
//!
//! ```yaml
//! groups:
//!   - key: "namespace_app_per_pod:http_server_requests_latency"
//!     common_name: Latency
//!     unit: ms
//!     scale: 1000
//!     metrics:
//!       - name: "namespace_app_per_pod:http_server_requests_latency"
//!         tags: '{namespace="foremast-examples",app="foo"}'
//!         role: base
//! scatter:
//!   x: "namespace_app_per_pod:http_server_requests_latency"
//!   y: "namespace_app_per_pod:http_server_requests_error_5xx"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tag selector used by the built-in catalog.
const EXAMPLE_TAGS: &str = r#"{namespace="foremast-examples",app="foo"}"#;

const LATENCY_KEY: &str = "namespace_app_per_pod:http_server_requests_latency";
const ERROR_5XX_KEY: &str = "namespace_app_per_pod:http_server_requests_error_5xx";
const CPU_KEY: &str = "namespace_app_per_pod:cpu_usage_seconds_total";
const MEMORY_KEY: &str = "namespace_app_per_pod:memory_usage_bytes";
const VERSIONS_KEY: &str =
    r#"sum by (label_version) (kube_pod_labels{label_app="foo", namespace="foremast-examples"})"#;

/// How a metric's series is used within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricRole {
    Base,
    Upper,
    Lower,
    Anomaly,
}

impl MetricRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricRole::Base => "base",
            MetricRole::Upper => "upper",
            MetricRole::Lower => "lower",
            MetricRole::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for MetricRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single queryable metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    /// Tag selector appended verbatim to the name, e.g. `{app="foo"}`.
    #[serde(default)]
    pub tags: String,
    pub role: MetricRole,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, tags: impl Into<String>, role: MetricRole) -> Self {
        Self {
            name: name.into(),
            tags: tags.into(),
            role,
        }
    }

    /// Query expression sent to the range-query API.
    pub fn expression(&self) -> String {
        format!("{}{}", self.name, self.tags)
    }
}

fn default_scale() -> f64 {
    1.0
}

/// A chart's worth of metrics sharing a scale factor and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGroup {
    pub key: String,
    pub common_name: String,
    #[serde(default)]
    pub unit: String,
    /// Multiplier applied to base/upper/lower values.
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub metrics: Vec<MetricDefinition>,
}

impl MetricGroup {
    /// The group's metric for `role`, if it has one.
    pub fn metric(&self, role: MetricRole) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.role == role)
    }
}

/// Group keys whose first metric feeds the scatter plot axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterSources {
    pub x: String,
    pub y: String,
}

/// Catalog loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read metric catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse metric catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("metric catalog has no groups")]
    Empty,

    #[error("metric group '{0}' is defined more than once")]
    DuplicateGroup(String),

    #[error("metric group '{0}' has no base metric")]
    MissingBase(String),

    #[error("metric group '{group}' has more than one {role} metric")]
    DuplicateRole { group: String, role: MetricRole },

    #[error("metric group '{group}' has a non-finite or zero scale {scale}")]
    InvalidScale { group: String, scale: f64 },

    #[error("scatter axis refers to unknown metric group '{0}'")]
    UnknownScatterGroup(String),
}

/// The full set of metric groups polled each cycle, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCatalog {
    pub groups: Vec<MetricGroup>,
    pub scatter: ScatterSources,
}

impl MetricCatalog {
    /// Parse and validate a catalog from YAML text.
    pub fn from_yaml_str(contents: &str) -> Result<Self, CatalogError> {
        let catalog: MetricCatalog = serde_yaml::from_str(contents)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read, parse and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Check the structural rules the assembler relies on.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.groups.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut keys = HashSet::new();
        for group in &self.groups {
            if !keys.insert(group.key.as_str()) {
                return Err(CatalogError::DuplicateGroup(group.key.clone()));
            }
            if !group.scale.is_finite() || group.scale == 0.0 {
                return Err(CatalogError::InvalidScale {
                    group: group.key.clone(),
                    scale: group.scale,
                });
            }

            let mut roles = HashSet::new();
            for metric in &group.metrics {
                if !roles.insert(metric.role) {
                    return Err(CatalogError::DuplicateRole {
                        group: group.key.clone(),
                        role: metric.role,
                    });
                }
            }
            if !roles.contains(&MetricRole::Base) {
                return Err(CatalogError::MissingBase(group.key.clone()));
            }
        }

        for axis in [&self.scatter.x, &self.scatter.y] {
            if !keys.contains(axis.as_str()) {
                return Err(CatalogError::UnknownScatterGroup(axis.clone()));
            }
        }

        Ok(())
    }

    pub fn group(&self, key: &str) -> Option<&MetricGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Group keys in display order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.key.as_str())
    }

    /// Metric queried for the scatter x axis.
    pub fn scatter_x(&self) -> Option<&MetricDefinition> {
        self.group(&self.scatter.x).and_then(|g| g.metrics.first())
    }

    /// Metric queried for the scatter y axis.
    pub fn scatter_y(&self) -> Option<&MetricDefinition> {
        self.group(&self.scatter.y).and_then(|g| g.metrics.first())
    }

    /// Built-in catalog for the foremast example application.
    pub fn builtin() -> Self {
        fn brain_group(
            key: &str,
            common_name: &str,
            unit: &str,
            scale: f64,
        ) -> MetricGroup {
            MetricGroup {
                key: key.to_string(),
                common_name: common_name.to_string(),
                unit: unit.to_string(),
                scale,
                metrics: vec![
                    MetricDefinition::new(key, EXAMPLE_TAGS, MetricRole::Base),
                    MetricDefinition::new(
                        format!("foremastbrain:{}_upper", key),
                        EXAMPLE_TAGS,
                        MetricRole::Upper,
                    ),
                    MetricDefinition::new(
                        format!("foremastbrain:{}_lower", key),
                        EXAMPLE_TAGS,
                        MetricRole::Lower,
                    ),
                    MetricDefinition::new(
                        format!("foremastbrain:{}_anomaly", key),
                        EXAMPLE_TAGS,
                        MetricRole::Anomaly,
                    ),
                ],
            }
        }

        Self {
            groups: vec![
                brain_group(LATENCY_KEY, "Latency", "ms", 1000.0),
                brain_group(ERROR_5XX_KEY, "Error 5XX", "errors", 1.0),
                brain_group(CPU_KEY, "CPU", "cores", 1.0),
                brain_group(MEMORY_KEY, "Memory", "MiB", 1.0 / (1024.0 * 1024.0)),
                MetricGroup {
                    key: VERSIONS_KEY.to_string(),
                    common_name: "Pods by Version".to_string(),
                    unit: "pods".to_string(),
                    scale: 1.0,
                    metrics: vec![MetricDefinition::new(VERSIONS_KEY, "", MetricRole::Base)],
                },
            ],
            scatter: ScatterSources {
                x: LATENCY_KEY.to_string(),
                y: ERROR_5XX_KEY.to_string(),
            },
        }
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
