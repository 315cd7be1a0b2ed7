//! Experiment repository.

use crate::error::MetadataResult;
use crate::models::{ExperimentRow, ExperimentSummary, ExperimentTagRow, LifecycleStage};
use crate::query::Select;
use async_trait::async_trait;

/// Repository for experiment operations.
#[async_trait]
pub trait ExperimentRepo: Send + Sync {
    /// Create a new experiment. The identifier is database-assigned and
    /// returned.
    async fn create_experiment(&self, experiment: &ExperimentRow) -> MetadataResult<i32>;

    /// Get an experiment by id.
    async fn get_experiment(&self, experiment_id: i32) -> MetadataResult<Option<ExperimentRow>>;

    /// Get an experiment by its unique name.
    async fn get_experiment_by_name(&self, name: &str) -> MetadataResult<Option<ExperimentRow>>;

    /// Return the experiment with the given name, creating it if absent.
    async fn first_or_create_experiment(
        &self,
        experiment: &ExperimentRow,
    ) -> MetadataResult<ExperimentRow>;

    /// List experiments in the given stage with their run counts.
    async fn list_experiments(
        &self,
        stage: LifecycleStage,
    ) -> MetadataResult<Vec<ExperimentSummary>>;

    /// Update name, stage and timestamps. Archiving cascades the lifecycle
    /// change and deleted_time onto the experiment's runs in the same
    /// transaction.
    async fn update_experiment(&self, experiment: &ExperimentRow) -> MetadataResult<()>;

    /// Set the artifact location after creation (it embeds the new id).
    async fn set_experiment_artifact_location(
        &self,
        experiment_id: i32,
        artifact_location: &str,
    ) -> MetadataResult<()>;

    /// Hard-delete experiments. Runs and their children go with them via
    /// foreign-key cascade; surviving runs are renumbered to close the
    /// row_num gap. Fails unless every id matched a row.
    async fn delete_experiments(&self, ids: &[i32]) -> MetadataResult<()>;

    /// Execute a compiled experiments/search statement.
    async fn search_experiments(&self, select: &Select) -> MetadataResult<Vec<ExperimentRow>>;

    /// Tags attached to an experiment.
    async fn experiment_tags(&self, experiment_id: i32) -> MetadataResult<Vec<ExperimentTagRow>>;

    /// Upsert an experiment tag on (experiment_id, key).
    async fn set_experiment_tag(&self, tag: &ExperimentTagRow) -> MetadataResult<()>;
}
