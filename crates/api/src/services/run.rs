//! Run workflows for the tracking API.

use crate::error::{ApiError, ApiResult};
use crate::request::{
    CreateRunRequest, DeleteRunTagRequest, LogBatchRequest, LogMetricRequest, LogParamRequest,
    SearchRunsRequest, SetRunTagRequest, UpdateRunRequest,
};
use crate::response::{RunResponse, SearchRunsResponse};
use crate::services::experiment::parse_experiment_id;
use crate::services::{current_time_ms, require};
use std::collections::HashMap;
use std::sync::Arc;
use tracklab_metadata::MetadataStore;
use tracklab_metadata::models::{
    LifecycleStage, MetricRow, ParamRow, ParamValue, RunRow, RunStatus, TagRow,
};
use tracklab_metadata::query::filter::{
    RunSearchParams, ViewType, compile_run_search, encode_page_token,
};
use tracklab_metadata::repos::{
    ExperimentRepo, MetricRepo, ParamRepo, RunRepo, RunUpdate, TagRepo,
};

/// Batch size for metric and param inserts inside log-batch.
const LOG_BATCH_SIZE: usize = 100;

/// Limits on a single log-batch request.
const MAX_BATCH_METRICS: usize = 1000;
const MAX_BATCH_PARAMS: usize = 100;
const MAX_BATCH_TAGS: usize = 100;

/// Service for run operations.
pub struct RunService {
    store: Arc<dyn MetadataStore>,
}

impl RunService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn create_run(&self, req: &CreateRunRequest) -> ApiResult<RunResponse> {
        let experiment_id = parse_experiment_id(&req.experiment_id)?;
        let experiment = self
            .store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| {
                ApiError::ResourceDoesNotExist(format!(
                    "unable to find experiment with id '{}'",
                    req.experiment_id
                ))
            })?;

        let run_id = tracklab_core::id::new_run_id();
        let name_from_tags = req
            .tags
            .iter()
            .find(|tag| tag.key == tracklab_core::TAG_RUN_NAME)
            .map(|tag| tag.value.clone());
        let name = if !req.run_name.is_empty() {
            req.run_name.clone()
        } else {
            name_from_tags
                .clone()
                .unwrap_or_else(|| format!("run-{}", &run_id[..8]))
        };

        let run = RunRow {
            run_uuid: run_id.clone(),
            name: name.clone(),
            source_type: "UNKNOWN".to_string(),
            source_name: String::new(),
            entry_point_name: String::new(),
            user_id: req.user_id.clone(),
            status: RunStatus::Running,
            start_time: Some(if req.start_time != 0 {
                req.start_time
            } else {
                current_time_ms()
            }),
            end_time: None,
            source_version: String::new(),
            lifecycle_stage: LifecycleStage::Active,
            artifact_uri: format!("{}/{run_id}/artifacts", experiment.artifact_location),
            experiment_id,
            deleted_time: None,
            row_num: 0,
        };
        let created = self.store.create_run(&run).await?;

        let mut tags: Vec<TagRow> = req
            .tags
            .iter()
            .map(|tag| TagRow {
                run_uuid: run_id.clone(),
                key: tag.key.clone(),
                value: tag.value.clone(),
            })
            .collect();
        if name_from_tags.is_none() {
            tags.push(TagRow {
                run_uuid: run_id.clone(),
                key: tracklab_core::TAG_RUN_NAME.to_string(),
                value: name,
            });
        }
        self.store
            .set_run_tags_batch(&run_id, LOG_BATCH_SIZE, &tags)
            .await?;

        self.run_response(&created).await
    }

    pub async fn update_run(&self, req: &UpdateRunRequest) -> ApiResult<RunResponse> {
        require(&req.run_id, "run_id")?;
        let status = match &req.status {
            Some(s) => Some(RunStatus::parse(s).ok_or_else(|| {
                ApiError::InvalidParameterValue(format!("invalid status '{s}'"))
            })?),
            None => None,
        };

        let run = self.get_run_row(&req.run_id).await?;
        self.store
            .update_run(
                &run.run_uuid,
                &RunUpdate {
                    name: req.run_name.clone(),
                    status,
                    end_time: req.end_time,
                },
            )
            .await?;

        let updated = self.get_run_row(&req.run_id).await?;
        self.run_response(&updated).await
    }

    pub async fn get_run(&self, run_id: &str) -> ApiResult<RunResponse> {
        require(run_id, "run_id")?;
        let run = self.get_run_row(run_id).await?;
        self.run_response(&run).await
    }

    pub async fn search_runs(&self, req: &SearchRunsRequest) -> ApiResult<SearchRunsResponse> {
        let mut experiment_ids = Vec::with_capacity(req.experiment_ids.len());
        for id in &req.experiment_ids {
            experiment_ids.push(parse_experiment_id(id)?);
        }

        let params = RunSearchParams {
            experiment_ids,
            filter: req.filter.clone(),
            view_type: ViewType::parse(&req.run_view_type)?,
            max_results: req.max_results,
            order_by: req.order_by.clone(),
            page_token: req.page_token.clone(),
        };
        let compiled = compile_run_search(&params, self.store.dialect())?;
        let runs = self.store.search_runs(&compiled.select).await?;

        let run_ids: Vec<String> = runs.iter().map(|run| run.run_uuid.clone()).collect();
        let mut params_by_run = group_by_run(self.store.params_for_runs(&run_ids).await?, |p| {
            p.run_uuid.clone()
        });
        let mut tags_by_run = group_by_run(self.store.tags_for_runs(&run_ids).await?, |t| {
            t.run_uuid.clone()
        });
        let mut latest_by_run =
            group_by_run(self.store.latest_metrics_for_runs(&run_ids).await?, |m| {
                m.run_uuid.clone()
            });

        let responses: Vec<RunResponse> = runs
            .iter()
            .map(|run| {
                RunResponse::from_rows(
                    run,
                    &params_by_run.remove(&run.run_uuid).unwrap_or_default(),
                    &tags_by_run.remove(&run.run_uuid).unwrap_or_default(),
                    &latest_by_run.remove(&run.run_uuid).unwrap_or_default(),
                )
            })
            .collect();

        let next_page_token = if responses.len() as i64 == compiled.limit {
            Some(encode_page_token(compiled.offset + compiled.limit))
        } else {
            None
        };
        Ok(SearchRunsResponse {
            runs: responses,
            next_page_token,
        })
    }

    pub async fn delete_run(&self, run_id: &str) -> ApiResult<()> {
        require(run_id, "run_id")?;
        let run = self.get_run_row(run_id).await?;
        self.store
            .archive_run(&run.run_uuid, current_time_ms())
            .await?;
        Ok(())
    }

    pub async fn restore_run(&self, run_id: &str) -> ApiResult<()> {
        require(run_id, "run_id")?;
        let run = self.get_run_row(run_id).await?;
        self.store.restore_run(&run.run_uuid).await?;
        Ok(())
    }

    pub async fn log_metric(&self, req: &LogMetricRequest) -> ApiResult<()> {
        require(&req.run_id, "run_id")?;
        require(&req.key, "key")?;
        if req.timestamp == 0 {
            return Err(ApiError::InvalidParameterValue(
                "Missing value for required parameter 'timestamp'".to_string(),
            ));
        }

        let run = self.active_run(&req.run_id).await?;
        let (value, is_nan) = req
            .value
            .to_stored()
            .map_err(ApiError::InvalidParameterValue)?;
        let metric = MetricRow {
            run_uuid: run.run_uuid.clone(),
            key: req.key.clone(),
            value,
            timestamp: req.timestamp,
            step: req.step,
            is_nan,
            iter: 0,
        };
        self.store
            .create_metrics_batch(&run.run_uuid, 1, &[metric])
            .await
            .map_err(|e| {
                ApiError::Internal(format!(
                    "unable to log metric '{}' for run '{}': {e}",
                    req.key, req.run_id
                ))
            })?;
        Ok(())
    }

    pub async fn log_param(&self, req: &LogParamRequest) -> ApiResult<()> {
        require(&req.run_id, "run_id")?;
        require(&req.key, "key")?;

        let run = self.active_run(&req.run_id).await?;
        let param = ParamRow::new(run.run_uuid.clone(), &req.key, ParamValue::parse(&req.value));
        self.store.create_params_batch(1, &[param]).await?;
        Ok(())
    }

    pub async fn set_run_tag(&self, req: &SetRunTagRequest) -> ApiResult<()> {
        require(&req.run_id, "run_id")?;
        require(&req.key, "key")?;

        let run = self.active_run(&req.run_id).await?;
        self.store
            .set_run_tags_batch(
                &run.run_uuid,
                1,
                &[TagRow {
                    run_uuid: run.run_uuid.clone(),
                    key: req.key.clone(),
                    value: req.value.clone(),
                }],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_run_tag(&self, req: &DeleteRunTagRequest) -> ApiResult<()> {
        require(&req.run_id, "run_id")?;
        require(&req.key, "key")?;

        let run = self.active_run(&req.run_id).await?;
        self.store
            .get_tag(&run.run_uuid, &req.key)
            .await?
            .ok_or_else(|| {
                ApiError::ResourceDoesNotExist(format!(
                    "Unable to find tag '{}' for run '{}'",
                    req.key, req.run_id
                ))
            })?;
        self.store.delete_tag(&run.run_uuid, &req.key).await?;
        Ok(())
    }

    /// Persist a mixed batch: params, then metrics, then tag upserts. Each
    /// sub-step is independent; a param conflict keeps its own error kind.
    pub async fn log_batch(&self, req: &LogBatchRequest) -> ApiResult<()> {
        require(&req.run_id, "run_id")?;
        if req.metrics.len() > MAX_BATCH_METRICS {
            return Err(ApiError::InvalidParameterValue(format!(
                "Metrics batch size exceeds the limit of {MAX_BATCH_METRICS}"
            )));
        }
        if req.params.len() > MAX_BATCH_PARAMS {
            return Err(ApiError::InvalidParameterValue(format!(
                "Params batch size exceeds the limit of {MAX_BATCH_PARAMS}"
            )));
        }
        if req.tags.len() > MAX_BATCH_TAGS {
            return Err(ApiError::InvalidParameterValue(format!(
                "Tags batch size exceeds the limit of {MAX_BATCH_TAGS}"
            )));
        }

        let run = self.active_run(&req.run_id).await?;

        // validate and convert everything before touching the store
        let mut metrics = Vec::with_capacity(req.metrics.len());
        for metric in &req.metrics {
            require(&metric.key, "key")?;
            if metric.timestamp == 0 {
                return Err(ApiError::InvalidParameterValue(
                    "Missing value for required parameter 'timestamp'".to_string(),
                ));
            }
            let (value, is_nan) = metric
                .value
                .to_stored()
                .map_err(ApiError::InvalidParameterValue)?;
            metrics.push(MetricRow {
                run_uuid: run.run_uuid.clone(),
                key: metric.key.clone(),
                value,
                timestamp: metric.timestamp,
                step: metric.step,
                is_nan,
                iter: 0,
            });
        }
        let params: Vec<ParamRow> = req
            .params
            .iter()
            .map(|param| {
                ParamRow::new(run.run_uuid.clone(), &param.key, ParamValue::parse(&param.value))
            })
            .collect();
        let tags: Vec<TagRow> = req
            .tags
            .iter()
            .map(|tag| TagRow {
                run_uuid: run.run_uuid.clone(),
                key: tag.key.clone(),
                value: tag.value.clone(),
            })
            .collect();

        self.store
            .create_params_batch(LOG_BATCH_SIZE, &params)
            .await
            .map_err(|e| match ApiError::from(e) {
                conflict @ ApiError::Conflict(_) => conflict,
                other => {
                    ApiError::Internal(format!(
                        "unable to insert params for run '{}': {other}",
                        run.run_uuid
                    ))
                }
            })?;
        self.store
            .create_metrics_batch(&run.run_uuid, LOG_BATCH_SIZE, &metrics)
            .await
            .map_err(|e| {
                ApiError::Internal(format!(
                    "unable to insert metrics for run '{}': {e}",
                    run.run_uuid
                ))
            })?;
        self.store
            .set_run_tags_batch(&run.run_uuid, LOG_BATCH_SIZE, &tags)
            .await
            .map_err(|e| {
                ApiError::Internal(format!(
                    "unable to insert tags for run '{}': {e}",
                    run.run_uuid
                ))
            })?;
        Ok(())
    }

    async fn get_run_row(&self, run_id: &str) -> ApiResult<RunRow> {
        self.store.get_run(run_id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find run '{run_id}'"))
        })
    }

    async fn active_run(&self, run_id: &str) -> ApiResult<RunRow> {
        self.store
            .get_run_in_stage(run_id, LifecycleStage::Active)
            .await?
            .ok_or_else(|| {
                ApiError::ResourceDoesNotExist(format!("Unable to find active run '{run_id}'"))
            })
    }

    async fn run_response(&self, run: &RunRow) -> ApiResult<RunResponse> {
        let ids = vec![run.run_uuid.clone()];
        let params = self.store.params_for_runs(&ids).await?;
        let tags = self.store.tags_for_runs(&ids).await?;
        let latest = self.store.latest_metrics_for_runs(&ids).await?;
        Ok(RunResponse::from_rows(run, &params, &tags, &latest))
    }
}

fn group_by_run<T>(rows: Vec<T>, key: impl Fn(&T) -> String) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}
