//! TTL cache for computed metric results.
//!
//! Keys are a pure function of the request's semantic shape (metric,
//! organization, scope entity, filters, and window *length* — never
//! absolute dates), so a "last 30 days" entry computed this morning is
//! reused this afternoon. The clock is injected so tests can drive
//! staleness deterministically.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::Result;
use crate::metrics::types::{MetricRequest, MetricResult};

/// Default TTL, in whole minutes, matching the default dashboard
/// refresh interval.
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Time source for cache staleness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

struct CacheEntry {
    request: MetricRequest,
    result: MetricResult,
    created_at: DateTime<Utc>,
    ttl_minutes: i64,
}

/// Derive the deterministic cache key for a request.
///
/// Two requests with identical semantic shape yield identical keys; a
/// difference in any scoping field yields a different key. View mode is
/// deliberately absent: rollups are composed from per-entity individual
/// entries, so the per-entity key is the cached unit.
pub fn cache_key(request: &MetricRequest) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}d",
        request.metric_id,
        request.organization_id,
        request.scope_entity_id,
        request.product_id.as_deref().unwrap_or("-"),
        request.territory_id.as_deref().unwrap_or("-"),
        request.window.days(),
    )
}

/// The one shared mutable structure in the engine. Concurrent reads and
/// writes to different keys are safe; concurrent misses for the same
/// key may both compute, and the last writer wins.
pub struct MetricCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    ttl_minutes: AtomicI64,
}

impl MetricCache {
    pub fn new(clock: Arc<dyn Clock>, ttl_minutes: i64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl_minutes: AtomicI64::new(ttl_minutes),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl_minutes.load(Ordering::Relaxed)
    }

    /// Change the TTL and clear all entries: keys cached under the old
    /// settings cannot be trusted to reflect the new configuration.
    pub fn set_ttl_minutes(&self, minutes: i64) {
        self.ttl_minutes.store(minutes, Ordering::Relaxed);
        self.entries.clear();
    }

    /// Fresh-entry lookup. A stale entry is removed and reported as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<MetricResult> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if now < entry.created_at + Duration::minutes(entry.ttl_minutes) {
                return Some(entry.result.clone());
            }
        }
        // Guard dropped above; safe to remove without deadlocking.
        self.entries.remove(key);
        None
    }

    /// Store a freshly computed result, stamping `created_at` from the
    /// injected clock. Overwrites any prior entry for the key.
    pub fn insert(&self, request: &MetricRequest, result: MetricResult) {
        let key = cache_key(request);
        self.entries.insert(
            key,
            CacheEntry {
                request: request.clone(),
                result,
                created_at: self.clock.now(),
                ttl_minutes: self.ttl_minutes(),
            },
        );
    }

    /// Return the cached result for `request`, or await `compute` and
    /// cache its output. Failures are not cached (no negative caching);
    /// the next lookup retries.
    pub async fn get_or_compute<F>(
        &self,
        request: &MetricRequest,
        compute: F,
    ) -> Result<MetricResult>
    where
        F: Future<Output = Result<MetricResult>>,
    {
        let key = cache_key(request);
        if let Some(hit) = self.get(&key) {
            log::debug!("cache hit for {key}");
            return Ok(hit);
        }
        log::debug!("cache miss for {key}");
        let result = compute.await?;
        self.insert(request, result.clone());
        Ok(result)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the requests behind every live entry, for the
    /// auto-refresh cycle to recompute.
    pub fn cached_requests(&self) -> Vec<MetricRequest> {
        self.entries
            .iter()
            .map(|entry| entry.request.clone())
            .collect()
    }
}
