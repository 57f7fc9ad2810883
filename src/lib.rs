pub mod batch;
pub mod cache;
pub mod error;
pub mod metrics;
pub mod rollup;
pub mod session;
pub mod store;
pub mod window;

pub use batch::{BatchFailure, BatchItem, BatchOutcome, BatchSummary, BatchTemplate, MAX_BATCH_SIZE};
pub use cache::{cache_key, Clock, ManualClock, MetricCache, SystemClock, DEFAULT_TTL_MINUTES};
pub use error::{Error, ErrorKind, Result};
pub use metrics::types::{
    EntityMetric, MetricRequest, MetricResponse, MetricResult, Trend, ViewMode,
};
pub use metrics::{CalculatorRegistry, MetricCalculator, MetricParams};
pub use rollup::{
    resolve_scope, AuthorizedScope, Hierarchy, HierarchyEdge, Identity, IdentityProvider, Role,
    StaticIdentityProvider,
};
pub use session::{DashboardSession, SessionSettings};
pub use store::{FactAggregate, FactKind, FactQuery, FactRow, MemoryStore, RecordStore};
pub use window::Window;

use std::sync::Arc;

/// The metric engine: registry, record store, cache, and hierarchy
/// wired together behind one entry point.
///
/// Cloning is cheap (all components are Arc-backed), which the batch
/// orchestrator relies on to hand clones to its worker tasks.
#[derive(Clone)]
pub struct MetricsEngine {
    registry: Arc<CalculatorRegistry>,
    store: Arc<dyn RecordStore>,
    cache: Arc<MetricCache>,
    hierarchy: Arc<Hierarchy>,
}

impl MetricsEngine {
    /// Engine with the system clock and default TTL.
    pub fn new(
        registry: CalculatorRegistry,
        store: Arc<dyn RecordStore>,
        hierarchy: Hierarchy,
    ) -> Self {
        Self::with_clock(
            registry,
            store,
            hierarchy,
            Arc::new(SystemClock),
            DEFAULT_TTL_MINUTES,
        )
    }

    /// Engine with an injected clock, for deterministic staleness in
    /// tests.
    pub fn with_clock(
        registry: CalculatorRegistry,
        store: Arc<dyn RecordStore>,
        hierarchy: Hierarchy,
        clock: Arc<dyn Clock>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            cache: Arc::new(MetricCache::new(clock, ttl_minutes)),
            hierarchy: Arc::new(hierarchy),
        }
    }

    pub fn registry(&self) -> &CalculatorRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Full single-request pipeline: fail-fast validation, scope
    /// resolution, then cache-or-compute per covered entity.
    ///
    /// Rollup members are computed in traversal order and every
    /// member's result is returned individually; combining them is
    /// metric-specific and left to the caller. A member's calculation
    /// failure propagates (single-request semantics — only batches
    /// isolate failures).
    pub async fn get_metric(
        &self,
        requester: &Identity,
        request: &MetricRequest,
    ) -> Result<MetricResponse> {
        self.registry.ensure_known(&request.metric_id)?;
        let scope = resolve_scope(
            requester,
            &request.scope_entity_id,
            request.view_mode,
            request.include_subordinates,
            &self.hierarchy,
        )?;

        match scope {
            AuthorizedScope::Individual { entity_id } => {
                let request = request.for_entity(&entity_id);
                let result = self.compute_individual(&request).await?;
                Ok(MetricResponse::Individual(result))
            }
            AuthorizedScope::Rollup { members, .. } => {
                let mut results = Vec::with_capacity(members.len());
                for member in &members {
                    let request = request.for_entity(member);
                    let result = self.compute_individual(&request).await?;
                    results.push(EntityMetric {
                        entity_id: member.clone(),
                        result,
                    });
                }
                Ok(MetricResponse::Rollup(results))
            }
        }
    }

    /// Concurrent fan-out over `entity_ids` with per-entity failure
    /// isolation. See [`batch::calculate_batch`].
    pub async fn calculate_batch(
        &self,
        requester: &Identity,
        entity_ids: Vec<String>,
        template: &BatchTemplate,
        per_entity_timeout: std::time::Duration,
    ) -> Result<BatchOutcome> {
        batch::calculate_batch(
            self.clone(),
            requester.clone(),
            entity_ids,
            template.clone(),
            per_entity_timeout,
        )
        .await
    }

    /// One entity's cache-or-compute. Authorization has already been
    /// settled by the caller.
    pub(crate) async fn compute_individual(
        &self,
        request: &MetricRequest,
    ) -> Result<MetricResult> {
        let params = MetricParams::from_request(request);
        self.cache
            .get_or_compute(request, async {
                self.registry
                    .calculate(self.store.as_ref(), &request.metric_id, &params)
                    .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fact(entity: &str, kind: FactKind, n: usize) -> Vec<FactRow> {
        (0..n)
            .map(|_| FactRow {
                organization_id: "org1".into(),
                entity_id: entity.into(),
                kind,
                product_id: None,
                territory_id: None,
                date: d(2025, 6, 15),
                amount: 1.0,
            })
            .collect()
    }

    fn engine() -> MetricsEngine {
        let mut facts = fact("r1", FactKind::Opportunities, 25);
        facts.extend(fact("r1", FactKind::WonOpportunities, 8));
        facts.extend(fact("m1", FactKind::Opportunities, 10));
        facts.extend(fact("m1", FactKind::WonOpportunities, 5));
        let hierarchy = Hierarchy::from_edges(vec![HierarchyEdge {
            subordinate_id: "r1".into(),
            manager_id: "m1".into(),
        }])
        .unwrap();
        MetricsEngine::new(
            CalculatorRegistry::with_builtins(),
            Arc::new(MemoryStore::new(facts)),
            hierarchy,
        )
    }

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.into(),
            organization_id: "org1".into(),
            role,
            manager_id: None,
        }
    }

    fn request(entity: &str, view_mode: ViewMode, include_subordinates: bool) -> MetricRequest {
        MetricRequest {
            metric_id: "win_rate".into(),
            organization_id: "org1".into(),
            scope_entity_id: entity.into(),
            product_id: None,
            territory_id: None,
            window: Window::new(d(2025, 6, 1), d(2025, 6, 30)).unwrap(),
            view_mode,
            include_subordinates,
        }
    }

    #[tokio::test]
    async fn test_individual_win_rate_and_cache_entry() {
        let engine = engine();
        let rep = identity("r1", Role::Rep);
        let response = engine
            .get_metric(&rep, &request("r1", ViewMode::Individual, false))
            .await
            .unwrap();

        match response {
            MetricResponse::Individual(result) => {
                assert_eq!(result.value, 32.0);
                assert!(result.confidence > 0.0);
            }
            other => panic!("expected individual response, got {other:?}"),
        }
        assert_eq!(engine.cache().len(), 1);
        assert_eq!(engine.cache().ttl_minutes(), DEFAULT_TTL_MINUTES);
    }

    #[tokio::test]
    async fn test_rollup_returns_per_member_results() {
        let engine = engine();
        let manager = identity("m1", Role::Manager);
        let response = engine
            .get_metric(&manager, &request("m1", ViewMode::Rollup, true))
            .await
            .unwrap();

        match response {
            MetricResponse::Rollup(results) => {
                assert_eq!(results.len(), 2);
                assert_eq!(results[0].entity_id, "m1");
                assert_eq!(results[0].result.value, 50.0);
                assert_eq!(results[1].entity_id, "r1");
                assert_eq!(results[1].result.value, 32.0);
            }
            other => panic!("expected rollup response, got {other:?}"),
        }
        // One cache entry per member.
        assert_eq!(engine.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_rollup_members_reuse_individual_cache() {
        let engine = engine();
        let manager = identity("m1", Role::Manager);

        // Individual fetch of the report populates the cache...
        engine
            .get_metric(&manager, &request("r1", ViewMode::Individual, false))
            .await
            .unwrap();
        assert_eq!(engine.cache().len(), 1);

        // ...and the rollup only adds the manager's own entry.
        engine
            .get_metric(&manager, &request("m1", ViewMode::Rollup, true))
            .await
            .unwrap();
        assert_eq!(engine.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_metric_fails_before_authorization() {
        let engine = engine();
        // A requester with no rights at all still sees the UnknownMetric
        // rejection first: fail-fast happens before scope resolution.
        let stranger = identity("nobody", Role::Rep);
        let mut req = request("r1", ViewMode::Individual, false);
        req.metric_id = "bogus".into();
        let err = engine.get_metric(&stranger, &req).await.unwrap_err();
        assert!(matches!(err, Error::UnknownMetric(_)));
    }

    #[tokio::test]
    async fn test_forbidden_propagates_without_calculation() {
        let engine = engine();
        let stranger = identity("nobody", Role::Rep);
        let err = engine
            .get_metric(&stranger, &request("r1", ViewMode::Individual, false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(engine.cache().is_empty());
    }
}
