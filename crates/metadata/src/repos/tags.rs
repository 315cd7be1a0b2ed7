//! Run tag repository.

use crate::error::MetadataResult;
use crate::models::TagRow;
use async_trait::async_trait;

/// Repository for run tag operations.
#[async_trait]
pub trait TagRepo: Send + Sync {
    /// Get a tag by run and key.
    async fn get_tag(&self, run_id: &str, key: &str) -> MetadataResult<Option<TagRow>>;

    /// Delete a tag by run and key.
    async fn delete_tag(&self, run_id: &str, key: &str) -> MetadataResult<()>;

    /// All tags for the given runs.
    async fn tags_for_runs(&self, run_ids: &[String]) -> MetadataResult<Vec<TagRow>>;
}
