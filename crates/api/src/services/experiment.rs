//! Experiment workflows for the tracking API.

use crate::error::{ApiError, ApiResult};
use crate::request::{CreateExperimentRequest, SearchExperimentsRequest, UpdateExperimentRequest};
use crate::response::{ExperimentResponse, SearchExperimentsResponse};
use crate::services::{current_time_ms, require};
use std::sync::Arc;
use tracklab_metadata::MetadataStore;
use tracklab_metadata::models::{ExperimentRow, ExperimentTagRow, LifecycleStage};
use tracklab_metadata::query::filter::{ViewType, compile_experiment_search};
use tracklab_metadata::repos::ExperimentRepo;

/// Service for experiment operations.
pub struct ExperimentService {
    store: Arc<dyn MetadataStore>,
    default_artifact_root: String,
}

impl ExperimentService {
    pub fn new(store: Arc<dyn MetadataStore>, default_artifact_root: String) -> Self {
        Self {
            store,
            default_artifact_root,
        }
    }

    /// Create an experiment; the artifact location defaults to a directory
    /// named after the new id under the configured root.
    pub async fn create_experiment(
        &self,
        req: &CreateExperimentRequest,
    ) -> ApiResult<ExperimentResponse> {
        require(&req.name, "name")?;

        let now = current_time_ms();
        let row = ExperimentRow {
            experiment_id: 0,
            name: req.name.clone(),
            artifact_location: req.artifact_location.clone(),
            lifecycle_stage: LifecycleStage::Active,
            creation_time: Some(now),
            last_update_time: Some(now),
        };
        let id = self.store.create_experiment(&row).await?;

        if req.artifact_location.is_empty() {
            let location = format!("{}/{id}", self.default_artifact_root);
            self.store
                .set_experiment_artifact_location(id, &location)
                .await?;
        }
        for tag in &req.tags {
            self.store
                .set_experiment_tag(&ExperimentTagRow {
                    experiment_id: id,
                    key: tag.key.clone(),
                    value: tag.value.clone(),
                })
                .await?;
        }

        self.experiment_response(id).await
    }

    pub async fn get_experiment(&self, experiment_id: &str) -> ApiResult<ExperimentResponse> {
        let id = parse_experiment_id(experiment_id)?;
        self.experiment_response(id).await
    }

    pub async fn get_experiment_by_name(&self, name: &str) -> ApiResult<ExperimentResponse> {
        require(name, "experiment_name")?;
        let experiment = self
            .store
            .get_experiment_by_name(name)
            .await?
            .ok_or_else(|| {
                ApiError::ResourceDoesNotExist(format!("unable to find experiment '{name}'"))
            })?;
        let tags = self.store.experiment_tags(experiment.experiment_id).await?;
        Ok(ExperimentResponse::from_row(&experiment, &tags))
    }

    pub async fn update_experiment(&self, req: &UpdateExperimentRequest) -> ApiResult<()> {
        let id = parse_experiment_id(&req.experiment_id)?;
        let mut experiment = self.get_row(id).await?;
        if let Some(name) = &req.new_name {
            require(name, "new_name")?;
            experiment.name = name.clone();
        }
        experiment.last_update_time = Some(current_time_ms());
        self.store.update_experiment(&experiment).await?;
        Ok(())
    }

    /// Archive an experiment. Its runs are archived in the same
    /// transaction and their row numbers are kept.
    pub async fn delete_experiment(&self, experiment_id: &str) -> ApiResult<()> {
        let id = parse_experiment_id(experiment_id)?;
        let mut experiment = self.get_row(id).await?;
        experiment.lifecycle_stage = LifecycleStage::Deleted;
        experiment.last_update_time = Some(current_time_ms());
        self.store.update_experiment(&experiment).await?;
        Ok(())
    }

    pub async fn restore_experiment(&self, experiment_id: &str) -> ApiResult<()> {
        let id = parse_experiment_id(experiment_id)?;
        let mut experiment = self.get_row(id).await?;
        experiment.lifecycle_stage = LifecycleStage::Active;
        experiment.last_update_time = Some(current_time_ms());
        self.store.update_experiment(&experiment).await?;
        Ok(())
    }

    pub async fn search_experiments(
        &self,
        req: &SearchExperimentsRequest,
    ) -> ApiResult<SearchExperimentsResponse> {
        let view_type = ViewType::parse(&req.view_type)?;
        let mut select = compile_experiment_search(&req.filter, view_type, self.store.dialect())?;
        let limit = tracklab_metadata::query::filter::normalize_max_results(req.max_results)?;
        select.limit(limit);

        let rows = self.store.search_experiments(&select).await?;
        let mut experiments = Vec::with_capacity(rows.len());
        for row in &rows {
            let tags = self.store.experiment_tags(row.experiment_id).await?;
            experiments.push(ExperimentResponse::from_row(row, &tags));
        }
        Ok(SearchExperimentsResponse { experiments })
    }

    async fn get_row(&self, id: i32) -> ApiResult<ExperimentRow> {
        self.store.get_experiment(id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find experiment '{id}'"))
        })
    }

    async fn experiment_response(&self, id: i32) -> ApiResult<ExperimentResponse> {
        let experiment = self.get_row(id).await?;
        let tags = self.store.experiment_tags(id).await?;
        Ok(ExperimentResponse::from_row(&experiment, &tags))
    }
}

pub(crate) fn parse_experiment_id(experiment_id: &str) -> ApiResult<i32> {
    experiment_id.parse::<i32>().map_err(|e| {
        ApiError::BadRequest(format!(
            "unable to parse experiment id '{experiment_id}': {e}"
        ))
    })
}
