//! Dashboard session: the process-local context adapter between
//! dashboard callers and the engine.
//!
//! Resolves the current identity once at construction, fills request
//! defaults from session settings, and exposes the single
//! `get_or_compute` entry point plus a periodic auto-refresh that
//! invalidates and recomputes everything currently cached.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::batch::{BatchOutcome, BatchTemplate};
use crate::cache::DEFAULT_TTL_MINUTES;
use crate::error::Result;
use crate::metrics::types::{MetricRequest, MetricResponse, ViewMode};
use crate::rollup::{Identity, IdentityProvider};
use crate::window::Window;
use crate::MetricsEngine;

/// Per-session configuration. Changing any of it clears the cache:
/// keys derived under the old settings cannot be trusted to reflect
/// the new configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Cache TTL in whole minutes; doubles as the dashboard refresh
    /// interval.
    pub ttl_minutes: i64,
    /// Window applied when a request does not name one.
    pub default_window_days: u32,
    /// Default product filter.
    pub product_id: Option<String>,
    /// Default territory filter.
    pub territory_id: Option<String>,
    /// Ceiling on a single batch unit's calculation time.
    pub per_entity_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_TTL_MINUTES,
            default_window_days: 30,
            product_id: None,
            territory_id: None,
            per_entity_timeout: Duration::from_secs(30),
        }
    }
}

/// A dashboard caller's session over the engine.
pub struct DashboardSession {
    engine: MetricsEngine,
    identity: Identity,
    settings: RwLock<SessionSettings>,
}

impl DashboardSession {
    /// Resolve the current identity once and bind it to the session.
    pub fn new(engine: MetricsEngine, provider: &dyn IdentityProvider) -> Result<Self> {
        let identity = provider.current_identity()?;
        engine.cache().set_ttl_minutes(SessionSettings::default().ttl_minutes);
        Ok(Self {
            engine,
            identity,
            settings: RwLock::new(SessionSettings::default()),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn engine(&self) -> &MetricsEngine {
        &self.engine
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings.read().unwrap().clone()
    }

    /// Apply new settings and clear the cache.
    pub fn update_settings(&self, settings: SessionSettings) {
        self.engine.cache().set_ttl_minutes(settings.ttl_minutes);
        *self.settings.write().unwrap() = settings;
    }

    /// Build a request from session defaults and run it through the
    /// engine. `scope_entity_id` defaults to the session identity;
    /// `window` defaults to the configured trailing window.
    pub async fn get_or_compute(
        &self,
        metric_id: &str,
        scope_entity_id: Option<&str>,
        view_mode: ViewMode,
        include_subordinates: bool,
        window: Option<Window>,
    ) -> Result<MetricResponse> {
        let settings = self.settings();
        let window = match window {
            Some(w) => w,
            None => Window::last_days(
                settings.default_window_days,
                chrono::Local::now().date_naive(),
            )?,
        };
        let request = MetricRequest {
            metric_id: metric_id.to_string(),
            organization_id: self.identity.organization_id.clone(),
            scope_entity_id: scope_entity_id.unwrap_or(&self.identity.id).to_string(),
            product_id: settings.product_id,
            territory_id: settings.territory_id,
            window,
            view_mode,
            include_subordinates,
        };
        self.engine.get_metric(&self.identity, &request).await
    }

    /// Batch calculation over `entity_ids` using session defaults.
    pub async fn calculate_batch(
        &self,
        entity_ids: Vec<String>,
        metric_id: &str,
        window: Option<Window>,
    ) -> Result<BatchOutcome> {
        let settings = self.settings();
        let window = match window {
            Some(w) => w,
            None => Window::last_days(
                settings.default_window_days,
                chrono::Local::now().date_naive(),
            )?,
        };
        let template = BatchTemplate {
            metric_id: metric_id.to_string(),
            organization_id: self.identity.organization_id.clone(),
            product_id: settings.product_id,
            territory_id: settings.territory_id,
            window,
        };
        self.engine
            .calculate_batch(
                &self.identity,
                entity_ids,
                &template,
                settings.per_entity_timeout,
            )
            .await
    }

    /// Invalidate and recompute every currently cached key. Returns the
    /// number of entries successfully recomputed; a recomputation
    /// failure is logged and skipped (never cached).
    pub async fn refresh_all(&self) -> usize {
        let requests = self.engine.cache().cached_requests();
        self.engine.cache().clear();

        let mut refreshed = 0;
        for request in requests {
            match self.engine.compute_individual(&request).await {
                Ok(_) => refreshed += 1,
                Err(e) => log::warn!(
                    "refresh failed for {} / {}: {e}",
                    request.metric_id,
                    request.scope_entity_id
                ),
            }
        }
        refreshed
    }

    /// Background task that runs [`refresh_all`](Self::refresh_all) on a
    /// fixed interval. Abort the returned handle to stop it.
    pub fn spawn_auto_refresh(
        self: &Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately; skip it so the
            // initial refresh happens one full interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let refreshed = session.refresh_all().await;
                log::info!("auto-refresh recomputed {refreshed} cached metrics");
            }
        })
    }
}
