pub mod calculators;
pub mod types;

pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::store::RecordStore;
use crate::window::Window;

/// The fixed parameter bundle every calculator receives.
#[derive(Debug, Clone)]
pub struct MetricParams {
    pub organization_id: String,
    pub entity_id: String,
    pub product_id: Option<String>,
    pub territory_id: Option<String>,
    pub window: Window,
}

impl MetricParams {
    /// Extract calculation parameters from a request, scoped to the
    /// request's own entity.
    pub fn from_request(request: &MetricRequest) -> Self {
        Self {
            organization_id: request.organization_id.clone(),
            entity_id: request.scope_entity_id.clone(),
            product_id: request.product_id.clone(),
            territory_id: request.territory_id.clone(),
            window: request.window,
        }
    }
}

/// A named metric calculation.
///
/// Implementations must be pure over their params and the read-only
/// aggregates they fetch from the store: no global mutable state, safe
/// to invoke concurrently for different scopes.
#[async_trait]
pub trait MetricCalculator: Send + Sync {
    /// Stable identifier this calculator is registered under.
    fn metric_id(&self) -> &'static str;

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult>;
}

/// Maps metric identifiers to calculators, registered at startup.
pub struct CalculatorRegistry {
    calculators: HashMap<&'static str, Arc<dyn MetricCalculator>>,
}

impl CalculatorRegistry {
    /// An empty registry. Most callers want [`with_builtins`](Self::with_builtins).
    pub fn new() -> Self {
        Self {
            calculators: HashMap::new(),
        }
    }

    /// A registry pre-loaded with the builtin sales metrics.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for calculator in calculators::builtins() {
            registry.register(calculator);
        }
        registry
    }

    /// Register a calculator under its own metric id. A later
    /// registration for the same id replaces the earlier one.
    pub fn register(&mut self, calculator: Arc<dyn MetricCalculator>) {
        self.calculators.insert(calculator.metric_id(), calculator);
    }

    pub fn contains(&self, metric_id: &str) -> bool {
        self.calculators.contains_key(metric_id)
    }

    /// Fail fast with `UnknownMetric` for an unregistered id.
    pub fn ensure_known(&self, metric_id: &str) -> Result<()> {
        if self.contains(metric_id) {
            Ok(())
        } else {
            Err(Error::UnknownMetric(metric_id.to_string()))
        }
    }

    /// Registered metric ids, sorted for stable display.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.calculators.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Dispatch a calculation to the registered calculator.
    pub async fn calculate(
        &self,
        store: &dyn RecordStore,
        metric_id: &str,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let calculator = self
            .calculators
            .get(metric_id)
            .ok_or_else(|| Error::UnknownMetric(metric_id.to_string()))?;
        calculator.calculate(store, params).await
    }
}

impl Default for CalculatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Data-completeness heuristic from sample size: 0 records → 0.0,
/// approaching 1.0 as the sample grows (n / (n + 10)).
pub fn confidence_from_sample(n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        n as f64 / (n as f64 + 10.0)
    }
}
