//! Run repository.

use crate::error::MetadataResult;
use crate::models::{LifecycleStage, RunRow, RunStatus, TagRow};
use crate::query::Select;
use async_trait::async_trait;

/// Partial update of a run's mutable fields.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub name: Option<String>,
    pub status: Option<RunStatus>,
    pub end_time: Option<i64>,
}

/// Repository for run operations.
#[async_trait]
pub trait RunRepo: Send + Sync {
    /// Insert a run. The row number is assigned atomically during insert as
    /// `(SELECT COALESCE(MAX(row_num), -1) FROM runs) + 1`; the stored row
    /// is returned.
    async fn create_run(&self, run: &RunRow) -> MetadataResult<RunRow>;

    /// Get a run by id.
    async fn get_run(&self, run_id: &str) -> MetadataResult<Option<RunRow>>;

    /// Get a run by id, requiring the given lifecycle stage.
    async fn get_run_in_stage(
        &self,
        run_id: &str,
        stage: LifecycleStage,
    ) -> MetadataResult<Option<RunRow>>;

    /// Partially update mutable fields. When the name changes, the
    /// display-name tag is upserted in the same transaction.
    async fn update_run(&self, run_id: &str, update: &RunUpdate) -> MetadataResult<()>;

    /// Flip lifecycle to deleted and stamp deleted_time. Rows are kept.
    async fn archive_run(&self, run_id: &str, deleted_time: i64) -> MetadataResult<()>;

    /// Flip lifecycle back to active and clear deleted_time.
    async fn restore_run(&self, run_id: &str) -> MetadataResult<()>;

    /// Batch archive.
    async fn archive_runs(&self, run_ids: &[String], deleted_time: i64) -> MetadataResult<()>;

    /// Batch restore.
    async fn restore_runs(&self, run_ids: &[String]) -> MetadataResult<()>;

    /// Hard-delete runs and renumber survivors so row numbers stay
    /// contiguous. A no-op for an empty id list.
    async fn delete_runs(&self, run_ids: &[String]) -> MetadataResult<()>;

    /// Upsert tags on (run_uuid, key) in batches.
    async fn set_run_tags_batch(
        &self,
        run_id: &str,
        batch_size: usize,
        tags: &[TagRow],
    ) -> MetadataResult<()>;

    /// Execute a compiled runs/search statement.
    async fn search_runs(&self, select: &Select) -> MetadataResult<Vec<RunRow>>;

    /// Total number of runs, regardless of stage.
    async fn count_runs(&self) -> MetadataResult<i64>;

    /// Row number of a run, if it exists.
    async fn row_num_for(&self, run_id: &str) -> MetadataResult<Option<i64>>;
}
