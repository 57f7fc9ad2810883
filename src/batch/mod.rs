//! Concurrent batch calculation with per-entity failure isolation.
//!
//! One tokio task per entity, joined through a `JoinSet` barrier:
//! the outcome is returned only after every unit has settled. Results
//! land in position-indexed slots, so collection order cannot race.

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::types::{MetricRequest, MetricResult, ViewMode};
use crate::rollup::{resolve_scope, Identity};
use crate::window::Window;
use crate::MetricsEngine;

/// Fan-out ceiling: batches above this are rejected before any work is
/// dispatched.
pub const MAX_BATCH_SIZE: usize = 50;

/// The shared shape of a batch request; the scope entity is filled in
/// per input id. Batch units are always individual-view calculations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTemplate {
    pub metric_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub territory_id: Option<String>,
    pub window: Window,
}

impl BatchTemplate {
    pub fn request_for(&self, entity_id: &str) -> MetricRequest {
        MetricRequest {
            metric_id: self.metric_id.clone(),
            organization_id: self.organization_id.clone(),
            scope_entity_id: entity_id.to_string(),
            product_id: self.product_id.clone(),
            territory_id: self.territory_id.clone(),
            window: self.window,
            view_mode: ViewMode::Individual,
            include_subordinates: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub entity_id: String,
    pub result: MetricResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub entity_id: String,
    pub error: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Disjoint partition of the input entity list: every input id appears
/// exactly once, in input order within each list.
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<BatchItem>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.succeeded.len() + self.failed.len(),
            success_count: self.succeeded.len(),
            failure_count: self.failed.len(),
        }
    }
}

/// Dispatch one calculation per entity and collect every outcome.
///
/// Fail-fast rejections (`BatchTooLarge`, `UnknownMetric`) happen
/// before anything is spawned. After that, a unit's failure —
/// authorization, calculation error, timeout, or panic — is captured in
/// `failed` without cancelling any other unit. Successful units
/// populate the cache exactly as an individual request would.
pub(crate) async fn calculate_batch(
    engine: MetricsEngine,
    requester: Identity,
    entity_ids: Vec<String>,
    template: BatchTemplate,
    per_entity_timeout: std::time::Duration,
) -> Result<BatchOutcome> {
    if entity_ids.len() > MAX_BATCH_SIZE {
        return Err(Error::BatchTooLarge {
            requested: entity_ids.len(),
            max: MAX_BATCH_SIZE,
        });
    }
    engine.registry().ensure_known(&template.metric_id)?;

    let mut set: JoinSet<(usize, Result<MetricResult>)> = JoinSet::new();
    for (idx, entity_id) in entity_ids.iter().enumerate() {
        let engine = engine.clone();
        let requester = requester.clone();
        let template = template.clone();
        let entity_id = entity_id.clone();
        set.spawn(async move {
            let outcome =
                run_unit(&engine, &requester, &entity_id, &template, per_entity_timeout).await;
            (idx, outcome)
        });
    }

    // Barrier: drain every unit before partitioning. A slot left empty
    // means its task panicked before producing an outcome.
    let mut slots: Vec<Option<Result<MetricResult>>> =
        (0..entity_ids.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(e) => log::error!("batch worker panicked: {e}"),
        }
    }

    let mut outcome = BatchOutcome::default();
    for (entity_id, slot) in entity_ids.into_iter().zip(slots) {
        match slot {
            Some(Ok(result)) => outcome.succeeded.push(BatchItem { entity_id, result }),
            Some(Err(e)) => outcome.failed.push(BatchFailure {
                entity_id,
                error: e.kind(),
                message: e.to_string(),
            }),
            None => outcome.failed.push(BatchFailure {
                entity_id,
                error: ErrorKind::Calculation,
                message: "calculation task panicked".into(),
            }),
        }
    }
    Ok(outcome)
}

async fn run_unit(
    engine: &MetricsEngine,
    requester: &Identity,
    entity_id: &str,
    template: &BatchTemplate,
    per_entity_timeout: std::time::Duration,
) -> Result<MetricResult> {
    resolve_scope(
        requester,
        entity_id,
        ViewMode::Individual,
        false,
        engine.hierarchy(),
    )?;
    let request = template.request_for(entity_id);
    match tokio::time::timeout(per_entity_timeout, engine.compute_individual(&request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Calculation {
            metric_id: template.metric_id.clone(),
            message: format!("timed out after {per_entity_timeout:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metrics::CalculatorRegistry;
    use crate::rollup::{Hierarchy, HierarchyEdge, Role};
    use crate::store::{FactAggregate, FactKind, FactQuery, FactRow, MemoryStore, RecordStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Store that errors for one entity and counts aggregate calls.
    struct FlakyStore {
        inner: MemoryStore,
        fail_entity: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn aggregate(&self, query: &FactQuery) -> crate::error::Result<FactAggregate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_entity.as_deref() == Some(query.entity_id.as_str()) {
                return Err(Error::Store("upstream unavailable".into()));
            }
            self.inner.aggregate(query).await
        }
    }

    fn facts_for(entities: &[&str]) -> Vec<FactRow> {
        let mut rows = Vec::new();
        for entity in entities {
            for _ in 0..10 {
                rows.push(FactRow {
                    organization_id: "org1".into(),
                    entity_id: entity.to_string(),
                    kind: FactKind::Opportunities,
                    product_id: None,
                    territory_id: None,
                    date: d(2025, 6, 15),
                    amount: 1.0,
                });
            }
            for _ in 0..4 {
                rows.push(FactRow {
                    organization_id: "org1".into(),
                    entity_id: entity.to_string(),
                    kind: FactKind::WonOpportunities,
                    product_id: None,
                    territory_id: None,
                    date: d(2025, 6, 15),
                    amount: 1.0,
                });
            }
        }
        rows
    }

    fn engine_over(store: Arc<dyn RecordStore>, entities: &[&str]) -> MetricsEngine {
        let edges = entities
            .iter()
            .map(|e| HierarchyEdge {
                subordinate_id: e.to_string(),
                manager_id: "m1".into(),
            })
            .collect();
        MetricsEngine::new(
            CalculatorRegistry::with_builtins(),
            store,
            Hierarchy::from_edges(edges).unwrap(),
        )
    }

    fn manager() -> Identity {
        Identity {
            id: "m1".into(),
            organization_id: "org1".into(),
            role: Role::Manager,
            manager_id: None,
        }
    }

    fn template() -> BatchTemplate {
        BatchTemplate {
            metric_id: "win_rate".into(),
            organization_id: "org1".into(),
            product_id: None,
            territory_id: None,
            window: Window::new(d(2025, 6, 1), d(2025, 6, 30)).unwrap(),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_batch_partition_covers_every_entity() {
        let entities = ["e1", "e2", "e3", "e4", "e5"];
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(facts_for(&entities)),
            fail_entity: Some("e3".into()),
            calls: AtomicUsize::new(0),
        });
        let engine = engine_over(store, &entities);

        let ids: Vec<String> = entities.iter().map(|s| s.to_string()).collect();
        let outcome = calculate_batch(engine, manager(), ids.clone(), template(), TIMEOUT)
            .await
            .unwrap();

        let summary = outcome.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.success_count, 4);
        assert_eq!(summary.failure_count, 1);

        let mut seen: Vec<String> = outcome
            .succeeded
            .iter()
            .map(|s| s.entity_id.clone())
            .chain(outcome.failed.iter().map(|f| f.entity_id.clone()))
            .collect();
        seen.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_batch_isolates_one_failure() {
        let entities = ["e1", "e2", "e3", "e4", "e5"];
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(facts_for(&entities)),
            fail_entity: Some("e3".into()),
            calls: AtomicUsize::new(0),
        });
        let engine = engine_over(store, &entities);

        let ids: Vec<String> = entities.iter().map(|s| s.to_string()).collect();
        let outcome = calculate_batch(engine, manager(), ids, template(), TIMEOUT)
            .await
            .unwrap();

        let succeeded: Vec<&str> = outcome
            .succeeded
            .iter()
            .map(|s| s.entity_id.as_str())
            .collect();
        assert_eq!(succeeded, vec!["e1", "e2", "e4", "e5"]);

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].entity_id, "e3");
        assert_eq!(outcome.failed[0].error, ErrorKind::Store);
    }

    #[tokio::test]
    async fn test_batch_too_large_rejected_before_any_work() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::default(),
            fail_entity: None,
            calls: AtomicUsize::new(0),
        });
        let calls_handle = Arc::clone(&store);
        let engine = engine_over(store, &[]);

        let ids: Vec<String> = (1..=51).map(|i| format!("r{i}")).collect();
        let err = calculate_batch(engine, manager(), ids, template(), TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::BatchTooLarge {
                requested: 51,
                max: 50
            }
        ));
        assert_eq!(calls_handle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_unknown_metric_rejected_up_front() {
        let entities = ["e1"];
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(facts_for(&entities)),
            fail_entity: None,
            calls: AtomicUsize::new(0),
        });
        let engine = engine_over(store, &entities);

        let mut template = template();
        template.metric_id = "bogus".into();
        let err = calculate_batch(engine, manager(), vec!["e1".into()], template, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMetric(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_entity_lands_in_failed() {
        let entities = ["e1"];
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(facts_for(&entities)),
            fail_entity: None,
            calls: AtomicUsize::new(0),
        });
        let engine = engine_over(store, &entities);

        // "outsider" is not in m1's hierarchy.
        let ids = vec!["e1".to_string(), "outsider".to_string()];
        let outcome = calculate_batch(engine, manager(), ids, template(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(outcome.succeeded.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].entity_id, "outsider");
        assert_eq!(outcome.failed[0].error, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_batch_populates_cache_for_individual_reuse() {
        let entities = ["e1", "e2"];
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(facts_for(&entities)),
            fail_entity: None,
            calls: AtomicUsize::new(0),
        });
        let calls_handle = Arc::clone(&store);
        let engine = engine_over(store, &entities);

        let ids: Vec<String> = entities.iter().map(|s| s.to_string()).collect();
        calculate_batch(engine.clone(), manager(), ids, template(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(engine.cache().len(), 2);

        // A follow-up individual request is a cache hit: no new store calls.
        let before = calls_handle.calls.load(Ordering::SeqCst);
        let request = template().request_for("e1");
        engine
            .get_metric(&manager(), &request)
            .await
            .unwrap();
        assert_eq!(calls_handle.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_slow_unit_times_out_without_blocking_batch() {
        /// Store that stalls for one entity.
        struct SlowStore {
            inner: MemoryStore,
            slow_entity: String,
        }

        #[async_trait]
        impl RecordStore for SlowStore {
            async fn aggregate(
                &self,
                query: &FactQuery,
            ) -> crate::error::Result<FactAggregate> {
                if query.entity_id == self.slow_entity {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                self.inner.aggregate(query).await
            }
        }

        let entities = ["e1", "e2", "e3"];
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(facts_for(&entities)),
            slow_entity: "e2".into(),
        });
        let engine = engine_over(store, &entities);

        let ids: Vec<String> = entities.iter().map(|s| s.to_string()).collect();
        let outcome = calculate_batch(
            engine,
            manager(),
            ids,
            template(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].entity_id, "e2");
        assert_eq!(outcome.failed[0].error, ErrorKind::Calculation);
        assert!(outcome.failed[0].message.contains("timed out"));
    }
}
