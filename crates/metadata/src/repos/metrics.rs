//! Metric repository.

use crate::error::MetadataResult;
use crate::models::{LatestMetricRow, MetricRow};
use async_trait::async_trait;

/// Repository for metric operations.
#[async_trait]
pub trait MetricRepo: Send + Sync {
    /// Insert metrics in batches. `iter` values on the input rows are
    /// ignored; each series' counter continues from
    /// `COALESCE(MAX(iter), 0) + 1` inside the insert transaction. Exact
    /// duplicate observations are dropped, and each (run, key) latest-metric
    /// summary is replaced when the incoming step is at least the stored
    /// one.
    async fn create_metrics_batch(
        &self,
        run_id: &str,
        batch_size: usize,
        metrics: &[MetricRow],
    ) -> MetadataResult<()>;

    /// Latest metrics for the given runs.
    async fn latest_metrics_for_runs(
        &self,
        run_ids: &[String],
    ) -> MetadataResult<Vec<LatestMetricRow>>;
}
