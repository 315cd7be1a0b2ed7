//! Bulk read/write operations backing the database importer.

use crate::error::MetadataResult;
use crate::models::{
    ExperimentRow, ExperimentTagRow, LatestMetricRow, MetricRow, ParamRow, RunRow, TagRow,
};
use async_trait::async_trait;

/// Repository for whole-table copies between stores.
///
/// The `import_*` methods insert with ON CONFLICT DO NOTHING inside one
/// transaction per call and return the number of rows actually written, so
/// re-importing the same source is idempotent.
#[async_trait]
pub trait ImportRepo: Send + Sync {
    async fn list_experiments_all(&self) -> MetadataResult<Vec<ExperimentRow>>;
    async fn list_experiment_tags_all(&self) -> MetadataResult<Vec<ExperimentTagRow>>;
    async fn list_runs_all(&self) -> MetadataResult<Vec<RunRow>>;
    async fn list_tags_all(&self) -> MetadataResult<Vec<TagRow>>;
    async fn list_params_all(&self) -> MetadataResult<Vec<ParamRow>>;
    async fn list_metrics_all(&self) -> MetadataResult<Vec<MetricRow>>;
    async fn list_latest_metrics_all(&self) -> MetadataResult<Vec<LatestMetricRow>>;

    async fn import_experiment_tags(&self, rows: &[ExperimentTagRow]) -> MetadataResult<u64>;
    /// Runs are inserted in the given order with freshly assigned row
    /// numbers, preserving relative creation order in the destination.
    async fn import_runs(&self, rows: &[RunRow]) -> MetadataResult<u64>;
    async fn import_tags(&self, rows: &[TagRow]) -> MetadataResult<u64>;
    async fn import_params(&self, rows: &[ParamRow]) -> MetadataResult<u64>;
    async fn import_metrics(&self, rows: &[MetricRow]) -> MetadataResult<u64>;
    async fn import_latest_metrics(&self, rows: &[LatestMetricRow]) -> MetadataResult<u64>;
}
