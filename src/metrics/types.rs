use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::window::Window;

/// How a metric request views its scope entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// The scope entity's own data only.
    Individual,
    /// The scope entity plus all transitive subordinates.
    Rollup,
}

/// Direction of a metric relative to its prior window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// A single metric request: which metric, for whom, over what window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRequest {
    pub metric_id: String,
    pub organization_id: String,
    pub scope_entity_id: String,
    pub product_id: Option<String>,
    pub territory_id: Option<String>,
    pub window: Window,
    pub view_mode: ViewMode,
    pub include_subordinates: bool,
}

impl MetricRequest {
    /// The same request re-scoped to a different entity, as an
    /// individual view. Used when expanding rollups and batches into
    /// per-entity calculations.
    pub fn for_entity(&self, entity_id: &str) -> Self {
        Self {
            scope_entity_id: entity_id.to_string(),
            view_mode: ViewMode::Individual,
            include_subordinates: false,
            ..self.clone()
        }
    }
}

/// A computed metric value. Immutable once produced; a recomputation
/// replaces the cache entry rather than mutating this in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub metric_id: String,
    pub value: f64,
    /// Data-completeness heuristic in [0, 1]. Zero underlying records
    /// yields confidence 0.0, not an error.
    pub confidence: f64,
    pub trend: Option<Trend>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MetricResult {
    pub fn new(metric_id: &str, value: f64, confidence: f64) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            value,
            confidence: confidence.clamp(0.0, 1.0),
            trend: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_trend(mut self, trend: Trend) -> Self {
        self.trend = Some(trend);
        self
    }

    pub fn with_metadata(
        mut self,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A per-entity result within a rollup view.
#[derive(Debug, Clone, Serialize)]
pub struct EntityMetric {
    pub entity_id: String,
    pub result: MetricResult,
}

/// Response to a single metric request.
///
/// Rollup mode returns the list of per-member results (root first);
/// how to combine them — sum, average, display — is metric-specific
/// and left to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricResponse {
    Individual(MetricResult),
    Rollup(Vec<EntityMetric>),
}
