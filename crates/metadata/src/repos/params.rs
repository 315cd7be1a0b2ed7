//! Param repository.

use crate::error::MetadataResult;
use crate::models::ParamRow;
use async_trait::async_trait;

/// Repository for param operations.
#[async_trait]
pub trait ParamRepo: Send + Sync {
    /// Insert params in batches with ON CONFLICT DO NOTHING on
    /// (run_uuid, key). If fewer rows land than were given, a conflict
    /// detection query distinguishes exact duplicates (ignored) from
    /// changed values, which fail the whole batch with
    /// [`crate::MetadataError::ParamConflict`].
    async fn create_params_batch(
        &self,
        batch_size: usize,
        params: &[ParamRow],
    ) -> MetadataResult<()>;

    /// All params for the given runs.
    async fn params_for_runs(&self, run_ids: &[String]) -> MetadataResult<Vec<ParamRow>>;
}
