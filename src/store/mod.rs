use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::window::Window;

/// Category of raw fact the record store can aggregate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// Opportunities closed (won or lost) in the window.
    Opportunities,
    /// Opportunities closed as won in the window.
    WonOpportunities,
    /// Sales activities (calls, visits, emails) logged in the window.
    Activities,
    /// Prescriptions attributed to the entity in the window.
    Prescriptions,
    /// Closed-won revenue amounts.
    Revenue,
    /// Quota targets assigned for the window.
    Quota,
    /// Open pipeline amounts as of the window.
    Pipeline,
}

/// A query for aggregate facts scoped to one entity and window.
#[derive(Debug, Clone)]
pub struct FactQuery {
    pub organization_id: String,
    pub entity_id: String,
    pub kind: FactKind,
    pub product_id: Option<String>,
    pub territory_id: Option<String>,
    pub window: Window,
}

/// Count, sum, and average of the facts matching a [`FactQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FactAggregate {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
}

/// Read-only query boundary to the persisted record store.
///
/// The store itself (opportunities, activities, prescriptions) lives
/// outside this crate; calculators only ever see aggregates. Failures
/// surface as `Error::Store` and are never cached.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn aggregate(&self, query: &FactQuery) -> Result<FactAggregate>;
}

/// One raw fact row, as loaded from a JSON fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRow {
    pub organization_id: String,
    pub entity_id: String,
    pub kind: FactKind,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub territory_id: Option<String>,
    pub date: NaiveDate,
    #[serde(default = "default_amount")]
    pub amount: f64,
}

fn default_amount() -> f64 {
    1.0
}

/// In-memory [`RecordStore`] backed by a flat list of fact rows.
///
/// Used by the CLI (fixture files) and by tests. Filtering semantics:
/// organization, entity, and kind must match exactly; product and
/// territory filters apply only when present on the query; the fact
/// date must fall inside the window (inclusive).
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<FactRow>,
}

impl MemoryStore {
    pub fn new(rows: Vec<FactRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: FactRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn matches(row: &FactRow, query: &FactQuery) -> bool {
        if row.organization_id != query.organization_id
            || row.entity_id != query.entity_id
            || row.kind != query.kind
        {
            return false;
        }
        if let Some(ref product) = query.product_id {
            if row.product_id.as_deref() != Some(product) {
                return false;
            }
        }
        if let Some(ref territory) = query.territory_id {
            if row.territory_id.as_deref() != Some(territory) {
                return false;
            }
        }
        query.window.contains(row.date)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn aggregate(&self, query: &FactQuery) -> Result<FactAggregate> {
        let mut count: u64 = 0;
        let mut sum: f64 = 0.0;
        for row in self.rows.iter().filter(|r| Self::matches(r, query)) {
            count += 1;
            sum += row.amount;
        }
        let avg = if count > 0 { sum / count as f64 } else { 0.0 };
        Ok(FactAggregate { count, sum, avg })
    }
}
