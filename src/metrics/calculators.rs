//! Builtin sales metric calculators.
//!
//! Each calculator reads aggregate facts from the record store and
//! reduces them to a single value plus a confidence score. Metrics with
//! a meaningful period-over-period comparison also report a trend
//! against the immediately preceding window of equal length.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::metrics::{confidence_from_sample, MetricCalculator, MetricParams};
use crate::metrics::types::{MetricResult, Trend};
use crate::store::{FactKind, FactQuery, RecordStore};
use crate::window::Window;

/// All builtin calculators, in registration order.
pub fn builtins() -> Vec<Arc<dyn MetricCalculator>> {
    vec![
        Arc::new(WinRate),
        Arc::new(QuotaAttainment),
        Arc::new(PrescriptionVolume),
        Arc::new(ActivityCount),
        Arc::new(AvgDealSize),
        Arc::new(PipelineValue),
    ]
}

fn query(params: &MetricParams, kind: FactKind) -> FactQuery {
    query_in(params, kind, params.window)
}

fn query_in(params: &MetricParams, kind: FactKind, window: Window) -> FactQuery {
    FactQuery {
        organization_id: params.organization_id.clone(),
        entity_id: params.entity_id.clone(),
        kind,
        product_id: params.product_id.clone(),
        territory_id: params.territory_id.clone(),
        window,
    }
}

/// Relative change below 2% counts as stable.
fn trend_between(current: f64, previous: f64) -> Trend {
    if previous == 0.0 {
        return if current > 0.0 { Trend::Up } else { Trend::Stable };
    }
    let change = (current - previous) / previous;
    if change > 0.02 {
        Trend::Up
    } else if change < -0.02 {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Percentage of closed opportunities that were won.
pub struct WinRate;

#[async_trait]
impl MetricCalculator for WinRate {
    fn metric_id(&self) -> &'static str {
        "win_rate"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let total = store.aggregate(&query(params, FactKind::Opportunities)).await?;
        if total.count == 0 {
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0)
                .with_metadata("sample_size", 0));
        }
        let won = store
            .aggregate(&query(params, FactKind::WonOpportunities))
            .await?;
        let value = won.count as f64 / total.count as f64 * 100.0;

        let prev_window = params.window.previous();
        let prev_total = store
            .aggregate(&query_in(params, FactKind::Opportunities, prev_window))
            .await?;
        let mut result = MetricResult::new(
            self.metric_id(),
            value,
            confidence_from_sample(total.count),
        )
        .with_metadata("won", won.count)
        .with_metadata("sample_size", total.count);
        if prev_total.count > 0 {
            let prev_won = store
                .aggregate(&query_in(params, FactKind::WonOpportunities, prev_window))
                .await?;
            let prev_value = prev_won.count as f64 / prev_total.count as f64 * 100.0;
            result = result.with_trend(trend_between(value, prev_value));
        }
        Ok(result)
    }
}

/// Closed-won revenue as a percentage of quota.
pub struct QuotaAttainment;

#[async_trait]
impl MetricCalculator for QuotaAttainment {
    fn metric_id(&self) -> &'static str {
        "quota_attainment"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let quota = store.aggregate(&query(params, FactKind::Quota)).await?;
        if quota.count == 0 || quota.sum == 0.0 {
            // No quota on record for the window: report zero attainment
            // with zero confidence rather than failing.
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0)
                .with_metadata("quota", 0.0));
        }
        let revenue = store.aggregate(&query(params, FactKind::Revenue)).await?;
        let value = revenue.sum / quota.sum * 100.0;
        Ok(MetricResult::new(
            self.metric_id(),
            value,
            confidence_from_sample(revenue.count),
        )
        .with_metadata("revenue", revenue.sum)
        .with_metadata("quota", quota.sum))
    }
}

/// Total prescriptions attributed to the entity, optionally filtered
/// by product and territory.
pub struct PrescriptionVolume;

#[async_trait]
impl MetricCalculator for PrescriptionVolume {
    fn metric_id(&self) -> &'static str {
        "prescription_volume"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let current = store
            .aggregate(&query(params, FactKind::Prescriptions))
            .await?;
        if current.count == 0 {
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0)
                .with_metadata("sample_size", 0));
        }
        let previous = store
            .aggregate(&query_in(
                params,
                FactKind::Prescriptions,
                params.window.previous(),
            ))
            .await?;
        Ok(MetricResult::new(
            self.metric_id(),
            current.sum,
            confidence_from_sample(current.count),
        )
        .with_trend(trend_between(current.sum, previous.sum))
        .with_metadata("sample_size", current.count))
    }
}

/// Number of sales activities logged in the window.
pub struct ActivityCount;

#[async_trait]
impl MetricCalculator for ActivityCount {
    fn metric_id(&self) -> &'static str {
        "activity_count"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let current = store.aggregate(&query(params, FactKind::Activities)).await?;
        if current.count == 0 {
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0));
        }
        let previous = store
            .aggregate(&query_in(
                params,
                FactKind::Activities,
                params.window.previous(),
            ))
            .await?;
        Ok(MetricResult::new(
            self.metric_id(),
            current.count as f64,
            confidence_from_sample(current.count),
        )
        .with_trend(trend_between(
            current.count as f64,
            previous.count as f64,
        )))
    }
}

/// Average closed-won deal amount.
pub struct AvgDealSize;

#[async_trait]
impl MetricCalculator for AvgDealSize {
    fn metric_id(&self) -> &'static str {
        "avg_deal_size"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let revenue = store.aggregate(&query(params, FactKind::Revenue)).await?;
        if revenue.count == 0 {
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0)
                .with_metadata("deals", 0));
        }
        Ok(MetricResult::new(
            self.metric_id(),
            revenue.avg,
            confidence_from_sample(revenue.count),
        )
        .with_metadata("deals", revenue.count))
    }
}

/// Total open pipeline amount.
pub struct PipelineValue;

#[async_trait]
impl MetricCalculator for PipelineValue {
    fn metric_id(&self) -> &'static str {
        "pipeline_value"
    }

    async fn calculate(
        &self,
        store: &dyn RecordStore,
        params: &MetricParams,
    ) -> Result<MetricResult> {
        let pipeline = store.aggregate(&query(params, FactKind::Pipeline)).await?;
        if pipeline.count == 0 {
            return Ok(MetricResult::new(self.metric_id(), 0.0, 0.0)
                .with_metadata("open_opportunities", 0));
        }
        Ok(MetricResult::new(
            self.metric_id(),
            pipeline.sum,
            confidence_from_sample(pipeline.count),
        )
        .with_metadata("open_opportunities", pipeline.count))
    }
}
