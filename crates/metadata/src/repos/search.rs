//! Dashboard search queries.
//!
//! These methods execute statements produced by the expression compiler
//! ([`crate::query::expr`]) and the fixed dashboard queries around them.

use crate::error::MetadataResult;
use crate::models::{MetricRow, MetricWithXAxis, RunRow, RunWithExperiment};
use crate::query::expr::ParsedQuery;
use async_trait::async_trait;

/// One (run, series) window for aligned-metric retrieval.
#[derive(Debug, Clone)]
pub struct AlignRequest {
    pub run_id: String,
    pub key: String,
    pub steps: f32,
}

/// Repository for dashboard search operations.
#[async_trait]
pub trait SearchRepo: Send + Sync {
    /// Runs matching a compiled dashboard query, newest row first. When
    /// `offset_row_num` is set only rows strictly below it are returned,
    /// which is how dashboard paging walks the row-number order.
    async fn dashboard_runs(
        &self,
        parsed: &ParsedQuery,
        limit: Option<i64>,
        offset_row_num: Option<i64>,
    ) -> MetadataResult<Vec<RunWithExperiment>>;

    /// Runs currently in RUNNING status.
    async fn active_runs(&self) -> MetadataResult<Vec<RunWithExperiment>>;

    /// One run with its experiment name.
    async fn run_info(&self, run_id: &str) -> MetadataResult<Option<RunWithExperiment>>;

    /// Metric series for a run restricted to the given keys, in iter order.
    async fn metrics_for_keys(
        &self,
        run_id: &str,
        keys: &[String],
    ) -> MetadataResult<Vec<MetricRow>>;

    /// Runs matched by a compiled metric query (which references
    /// `latest_metrics` directly), with experiment names, newest row first.
    async fn dashboard_metric_runs(
        &self,
        parsed: &ParsedQuery,
    ) -> MetadataResult<Vec<RunWithExperiment>>;

    /// Metric rows for a compiled metric query, downsampled to roughly
    /// `steps` points per series, ordered by run row_num descending then
    /// key then iter. When `x_axis` is set, each row also carries the value
    /// of that series at the same iter.
    async fn dashboard_metrics(
        &self,
        parsed: &ParsedQuery,
        steps: i64,
        x_axis: Option<&str>,
    ) -> MetadataResult<Vec<MetricWithXAxis>>;

    /// Values of the `align_by` series sampled on each requested series'
    /// step grid, ordered by run then key then iter.
    async fn aligned_metrics(
        &self,
        requests: &[AlignRequest],
        align_by: &str,
    ) -> MetadataResult<Vec<MetricRow>>;

    /// All runs of one experiment, for the activity view.
    async fn runs_for_experiment(&self, experiment_id: i32) -> MetadataResult<Vec<RunRow>>;
}
