//! Dashboard API workflows: experiment browsing, streamed run/metric
//! search, batch lifecycle operations, dashboards and apps.

use crate::encoding::{TreeValue, encode_tree, numpy_f64};
use crate::error::{ApiError, ApiResult};
use crate::request::{
    AlignedMetricsRequest, CreateAppRequest, CreateDashboardRequest, DashboardUpdateRunRequest,
    MetricSearchQuery, RunSearchQuery, UpdateDashboardRequest,
};
use crate::response::{
    AppResponse, DashboardExperimentResponse, DashboardResponse, ExperimentActivityResponse,
    ExperimentRunResponse, ExperimentRunsResponse,
};
use crate::services::current_time_ms;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use tracklab_metadata::MetadataStore;
use tracklab_metadata::models::{
    AppRow, DashboardRow, LatestMetricRow, LifecycleStage, ParamRow, RunStatus, RunWithExperiment,
    TagRow,
};
use tracklab_metadata::query::expr::{DefaultExpression, QueryParser, Tables};
use tracklab_metadata::repos::{
    AlignRequest, DashboardRepo, ExperimentRepo, MetricRepo, ParamRepo, RunRepo, SearchRepo,
    TagRepo,
};
use uuid::Uuid;

/// Metric series returned by the per-run metric batch endpoint. NaN values
/// serialize as null.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetricSeries {
    pub name: String,
    pub context: serde_json::Value,
    pub values: Vec<Option<f64>>,
    pub iters: Vec<i64>,
}

/// Sequence names accepted by the run-info endpoint. Only `metric` carries
/// data; the others are accepted and returned empty.
const RUN_INFO_SEQUENCES: &[&str] = &[
    "audios",
    "distributions",
    "figures",
    "images",
    "log_records",
    "logs",
    "metric",
    "texts",
];

/// Service for dashboard operations.
pub struct DashboardService {
    store: Arc<dyn MetadataStore>,
}

impl DashboardService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    fn query_parser(&self, tz_offset: i64, with_metrics: bool) -> QueryParser {
        QueryParser {
            default: DefaultExpression {
                contains: "run.archived".to_string(),
                expression: "not run.archived".to_string(),
            },
            tables: Tables {
                runs: "runs".to_string(),
                experiments: Some("experiments".to_string()),
                metrics: with_metrics.then(|| "latest_metrics".to_string()),
            },
            tz_offset,
            dialect: self.store.dialect(),
        }
    }

    // =========================================================================
    // Experiments
    // =========================================================================

    pub async fn experiments(&self) -> ApiResult<Vec<DashboardExperimentResponse>> {
        let summaries = self.store.list_experiments(LifecycleStage::Active).await?;
        Ok(summaries
            .iter()
            .map(DashboardExperimentResponse::from_summary)
            .collect())
    }

    pub async fn experiment(&self, experiment_id: &str) -> ApiResult<DashboardExperimentResponse> {
        let id = super::experiment::parse_experiment_id(experiment_id)?;
        let experiment = self.store.get_experiment(id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find experiment '{experiment_id}'"))
        })?;
        let runs = self.store.runs_for_experiment(id).await?;
        Ok(DashboardExperimentResponse {
            id: experiment.experiment_id.to_string(),
            name: experiment.name,
            description: None,
            archived: experiment.lifecycle_stage == LifecycleStage::Deleted,
            run_count: runs.len() as i64,
            creation_time: experiment.creation_time.unwrap_or(0) as f64 / 1000.0,
        })
    }

    pub async fn experiment_runs(
        &self,
        experiment_id: &str,
        limit: Option<i64>,
        offset: Option<&str>,
    ) -> ApiResult<ExperimentRunsResponse> {
        let id = super::experiment::parse_experiment_id(experiment_id)?;
        let mut runs = self.store.runs_for_experiment(id).await?;
        runs.sort_by_key(|run| std::cmp::Reverse(run.row_num));

        if let Some(offset_id) = offset {
            let offset_row = self.store.row_num_for(offset_id).await?.unwrap_or(0);
            runs.retain(|run| run.row_num < offset_row);
        }
        if let Some(limit) = limit {
            runs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(ExperimentRunsResponse {
            id: experiment_id.to_string(),
            runs: runs
                .iter()
                .map(|run| ExperimentRunResponse {
                    run_id: run.run_uuid.clone(),
                    name: run.name.clone(),
                    creation_time: run.start_time.unwrap_or(0) as f64 / 1000.0,
                    end_time: run.end_time.map(|t| t as f64 / 1000.0),
                    archived: run.lifecycle_stage == LifecycleStage::Deleted,
                })
                .collect(),
        })
    }

    pub async fn experiment_activity(
        &self,
        experiment_id: &str,
        tz_offset: i64,
    ) -> ApiResult<ExperimentActivityResponse> {
        let id = super::experiment::parse_experiment_id(experiment_id)?;
        let runs = self.store.runs_for_experiment(id).await?;

        let mut activity_map: BTreeMap<String, i64> = BTreeMap::new();
        let mut archived = 0;
        let mut active = 0;
        for run in &runs {
            if run.lifecycle_stage == LifecycleStage::Deleted {
                archived += 1;
            } else if run.status == RunStatus::Running {
                active += 1;
            }
            let local_ms = run.start_time.unwrap_or(0) - tz_offset * 60_000;
            *activity_map.entry(day_key(local_ms)).or_default() += 1;
        }

        Ok(ExperimentActivityResponse {
            num_runs: runs.len() as i64,
            num_archived_runs: archived,
            num_active_runs: active,
            activity_map,
        })
    }

    // =========================================================================
    // Single-run JSON endpoints
    // =========================================================================

    pub async fn run_info(
        &self,
        run_id: &str,
        sequences: &[String],
    ) -> ApiResult<serde_json::Value> {
        let sequences: Vec<&str> = if sequences.is_empty() {
            RUN_INFO_SEQUENCES.to_vec()
        } else {
            sequences.iter().map(String::as_str).collect()
        };
        for sequence in &sequences {
            if !RUN_INFO_SEQUENCES.contains(sequence) {
                return Err(ApiError::InvalidParameterValue(format!(
                    "\"{sequence}\" is not a valid Sequence"
                )));
            }
        }

        let run = self.store.run_info(run_id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find run '{run_id}'"))
        })?;
        let ids = vec![run.run.run_uuid.clone()];
        let params = self.store.params_for_runs(&ids).await?;
        let tags = self.store.tags_for_runs(&ids).await?;
        let latest = self.store.latest_metrics_for_runs(&ids).await?;

        let mut params_json = serde_json::Map::new();
        for param in &params {
            params_json.insert(param.key.clone(), param_json_value(param));
        }
        let tags_json: serde_json::Map<String, serde_json::Value> = tags
            .iter()
            .map(|tag| (tag.key.clone(), serde_json::Value::from(tag.value.clone())))
            .collect();
        params_json.insert("tags".to_string(), serde_json::Value::Object(tags_json));

        let mut traces = serde_json::Map::new();
        for sequence in &sequences {
            if *sequence == "metric" {
                let metrics: Vec<serde_json::Value> = latest
                    .iter()
                    .map(|metric| {
                        serde_json::json!({
                            "name": metric.key,
                            "last_value": json_float(metric.value, metric.is_nan),
                            "context": {},
                        })
                    })
                    .collect();
                traces.insert("metric".to_string(), serde_json::Value::from(metrics));
            } else {
                traces.insert(sequence.to_string(), serde_json::json!([]));
            }
        }

        Ok(serde_json::json!({
            "params": params_json,
            "traces": traces,
            "props": run_props_json(&run),
        }))
    }

    pub async fn run_metric_batch(
        &self,
        run_id: &str,
        names: &[String],
    ) -> ApiResult<Vec<RunMetricSeries>> {
        self.store.run_info(run_id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find run '{run_id}'"))
        })?;

        // dedupe while keeping the request order
        let mut keys: Vec<String> = Vec::new();
        for name in names {
            if !keys.contains(name) {
                keys.push(name.clone());
            }
        }
        let rows = self.store.metrics_for_keys(run_id, &keys).await?;

        let mut by_key: HashMap<&str, (Vec<Option<f64>>, Vec<i64>)> = HashMap::new();
        for row in &rows {
            let entry = by_key.entry(row.key.as_str()).or_default();
            entry.0.push(if row.is_nan { None } else { Some(row.value) });
            entry.1.push(row.iter);
        }

        Ok(keys
            .iter()
            .map(|key| {
                let (values, iters) = by_key.remove(key.as_str()).unwrap_or_default();
                RunMetricSeries {
                    name: key.clone(),
                    context: serde_json::json!({}),
                    values,
                    iters,
                }
            })
            .collect())
    }

    pub async fn update_run(
        &self,
        run_id: &str,
        req: &DashboardUpdateRunRequest,
    ) -> ApiResult<()> {
        let run = self.store.get_run(run_id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find run '{run_id}'"))
        })?;

        if let Some(archived) = req.archived {
            if archived {
                self.store
                    .archive_run(&run.run_uuid, current_time_ms())
                    .await?;
            } else {
                self.store.restore_run(&run.run_uuid).await?;
            }
        }
        if let Some(name) = &req.name {
            self.store
                .update_run(
                    &run.run_uuid,
                    &tracklab_metadata::repos::RunUpdate {
                        name: Some(name.clone()),
                        status: None,
                        end_time: None,
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn delete_run(&self, run_id: &str) -> ApiResult<()> {
        self.store
            .delete_runs(&[run_id.to_string()])
            .await
            .map_err(|e| ApiError::Internal(format!("unable to delete run '{run_id}': {e}")))
    }

    pub async fn archive_batch(&self, run_ids: &[String], archive: bool) -> ApiResult<()> {
        if archive {
            self.store
                .archive_runs(run_ids, current_time_ms())
                .await?;
        } else {
            self.store.restore_runs(run_ids).await?;
        }
        Ok(())
    }

    pub async fn delete_batch(&self, run_ids: &[String]) -> ApiResult<()> {
        self.store.delete_runs(run_ids).await?;
        Ok(())
    }

    // =========================================================================
    // Streaming searches
    // =========================================================================

    /// Stream matching runs as encoded trees, one record per run, with
    /// interleaved progress records.
    pub async fn search_runs<W: Write>(
        &self,
        query: &RunSearchQuery,
        tz_offset: i64,
        w: &mut W,
    ) -> ApiResult<()> {
        let parsed = self.query_parser(tz_offset, false).parse(&query.q)?;
        let total = self.store.count_runs().await?;

        let offset_row_num = if query.offset.is_empty() {
            None
        } else {
            Some(self.store.row_num_for(&query.offset).await?.unwrap_or(0))
        };
        let limit = (query.limit > 0).then_some(query.limit);
        let runs = self
            .store
            .dashboard_runs(&parsed, limit, offset_row_num)
            .await?;

        let run_ids: Vec<String> = runs.iter().map(|run| run.run.run_uuid.clone()).collect();
        let mut params_by_run = HashMap::new();
        let mut tags_by_run = HashMap::new();
        if !query.exclude_params {
            params_by_run = group_params(self.store.params_for_runs(&run_ids).await?);
            tags_by_run = group_tags(self.store.tags_for_runs(&run_ids).await?);
        }
        let mut latest_by_run = HashMap::new();
        if !query.exclude_traces {
            latest_by_run = group_latest(self.store.latest_metrics_for_runs(&run_ids).await?);
        }

        let outcome: std::io::Result<()> = (|| {
            for (i, run) in runs.iter().enumerate() {
                let id = &run.run.run_uuid;
                let mut record = vec![("props".to_string(), run_props_tree(run))];
                if !query.exclude_traces {
                    let latest = latest_by_run.remove(id).unwrap_or_default();
                    record.push((
                        "traces".to_string(),
                        TreeValue::map([("metric", latest_traces_tree(&latest))]),
                    ));
                }
                if !query.exclude_params {
                    let params = params_by_run.remove(id).unwrap_or_default();
                    let tags = tags_by_run.remove(id).unwrap_or_default();
                    record.push(("params".to_string(), params_tree(&params, &tags)));
                }

                encode_tree(w, &TreeValue::map([(id.clone(), TreeValue::Map(record))]))?;
                if query.report_progress {
                    encode_tree(
                        w,
                        &progress_record(i, total - run.run.row_num, total),
                    )?;
                }
                w.flush()?;
            }

            if query.report_progress {
                encode_tree(w, &progress_record(runs.len(), total, total))?;
                w.flush()?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            tracing::error!(error = %err, "error streaming runs");
        }
        Ok(())
    }

    /// Stream runs currently in RUNNING status.
    pub async fn active_runs<W: Write>(&self, report_progress: bool, w: &mut W) -> ApiResult<()> {
        let runs = self.store.active_runs().await?;
        let run_ids: Vec<String> = runs.iter().map(|run| run.run.run_uuid.clone()).collect();
        let mut latest_by_run = group_latest(self.store.latest_metrics_for_runs(&run_ids).await?);

        let total = runs.len() as i64;
        let outcome: std::io::Result<()> = (|| {
            for (i, run) in runs.iter().enumerate() {
                let id = &run.run.run_uuid;
                let latest = latest_by_run.remove(id).unwrap_or_default();
                encode_tree(
                    w,
                    &TreeValue::map([(
                        id.clone(),
                        TreeValue::map([
                            ("props", run_props_tree(run)),
                            (
                                "traces",
                                TreeValue::map([("metric", latest_traces_tree(&latest))]),
                            ),
                        ]),
                    )]),
                )?;
                if report_progress {
                    encode_tree(w, &progress_record(i, i as i64 + 1, total))?;
                }
                w.flush()?;
            }
            if report_progress {
                encode_tree(w, &progress_record(runs.len(), total, total))?;
                w.flush()?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            tracing::error!(error = %err, "error streaming active runs");
        }
        Ok(())
    }

    /// Stream downsampled metric series grouped per run. Queries must select
    /// a metric.
    pub async fn search_metrics<W: Write>(
        &self,
        query: &MetricSearchQuery,
        tz_offset: i64,
        w: &mut W,
    ) -> ApiResult<()> {
        let parsed = self.query_parser(tz_offset, true).parse(&query.q)?;
        if !parsed.is_metric_selected() {
            return Err(ApiError::InvalidParameterValue(
                "No metrics are selected".to_string(),
            ));
        }

        let total = self.store.count_runs().await?;
        let runs = self.store.dashboard_metric_runs(&parsed).await?;
        let run_ids: Vec<String> = runs.iter().map(|run| run.run.run_uuid.clone()).collect();
        let mut params_by_run = group_params(self.store.params_for_runs(&run_ids).await?);
        let mut tags_by_run = group_tags(self.store.tags_for_runs(&run_ids).await?);

        let mut infos: HashMap<String, (TreeValue, i64)> = HashMap::new();
        for run in &runs {
            let id = run.run.run_uuid.clone();
            let params = params_by_run.remove(&id).unwrap_or_default();
            let tags = tags_by_run.remove(&id).unwrap_or_default();
            let info = TreeValue::map([
                ("props", run_props_tree(run)),
                ("params", params_tree(&params, &tags)),
            ]);
            infos.insert(id, (info, run.run.row_num));
        }

        let rows = self
            .store
            .dashboard_metrics(&parsed, query.steps, query.x_axis.as_deref())
            .await?;
        let with_x_axis = query.x_axis.is_some();
        let steps = query.steps;
        let report_progress = query.report_progress;

        let outcome: std::io::Result<()> = (|| {
            let mut progress = 0usize;
            let mut run_id = String::new();
            let mut key = String::new();
            let mut metrics: Vec<TreeValue> = Vec::new();
            let mut values: Vec<f64> = Vec::new();
            let mut iters: Vec<f64> = Vec::new();
            let mut epochs: Vec<f64> = Vec::new();
            let mut timestamps: Vec<f64> = Vec::new();
            let mut x_values: Vec<f64> = Vec::new();

            macro_rules! push_series {
                () => {
                    if !key.is_empty() {
                        let mut metric = vec![
                            ("name".to_string(), TreeValue::from(key.clone())),
                            ("context".to_string(), TreeValue::Map(Vec::new())),
                            (
                                "slice".to_string(),
                                TreeValue::List(vec![
                                    TreeValue::Int(0),
                                    TreeValue::Int(0),
                                    TreeValue::Int(steps),
                                ]),
                            ),
                            ("values".to_string(), numpy_f64(&values)),
                            ("iters".to_string(), numpy_f64(&iters)),
                            ("epochs".to_string(), numpy_f64(&epochs)),
                            ("timestamps".to_string(), numpy_f64(&timestamps)),
                        ];
                        if with_x_axis {
                            metric.push(("x_axis_values".to_string(), numpy_f64(&x_values)));
                            metric.push(("x_axis_iters".to_string(), numpy_f64(&iters)));
                        } else {
                            metric.push(("x_axis_values".to_string(), TreeValue::Null));
                            metric.push(("x_axis_iters".to_string(), TreeValue::Null));
                        }
                        metrics.push(TreeValue::Map(metric));
                    }
                };
            }

            for row in &rows {
                if row.metric.run_uuid != run_id || row.metric.key != key {
                    push_series!();

                    if row.metric.run_uuid != run_id {
                        // close the previous run, then announce the new one
                        if !run_id.is_empty() {
                            encode_tree(
                                w,
                                &TreeValue::map([(
                                    run_id.clone(),
                                    TreeValue::map([(
                                        "traces",
                                        TreeValue::List(std::mem::take(&mut metrics)),
                                    )]),
                                )]),
                            )?;
                            if report_progress {
                                let row_num =
                                    infos.get(&run_id).map(|(_, row_num)| *row_num).unwrap_or(0);
                                encode_tree(
                                    w,
                                    &progress_record(progress, total - row_num, total),
                                )?;
                                progress += 1;
                            }
                            w.flush()?;
                        }
                        metrics = Vec::new();
                        run_id = row.metric.run_uuid.clone();
                        if let Some((info, _)) = infos.get(&run_id) {
                            encode_tree(
                                w,
                                &TreeValue::map([(run_id.clone(), info.clone())]),
                            )?;
                        }
                    }

                    key = row.metric.key.clone();
                    values = Vec::new();
                    iters = Vec::new();
                    epochs = Vec::new();
                    timestamps = Vec::new();
                    x_values = Vec::new();
                }

                values.push(if row.metric.is_nan {
                    f64::NAN
                } else {
                    row.metric.value
                });
                iters.push(row.metric.iter as f64);
                epochs.push(row.metric.step as f64);
                timestamps.push(row.metric.timestamp as f64 / 1000.0);
                if with_x_axis {
                    x_values.push(match (row.x_axis_is_nan, row.x_axis_value) {
                        (Some(true), _) | (_, None) => f64::NAN,
                        (_, Some(v)) => v,
                    });
                }
            }

            push_series!();
            if !run_id.is_empty() {
                encode_tree(
                    w,
                    &TreeValue::map([(
                        run_id.clone(),
                        TreeValue::map([("traces", TreeValue::List(metrics))]),
                    )]),
                )?;
                if report_progress {
                    let row_num = infos.get(&run_id).map(|(_, row_num)| *row_num).unwrap_or(0);
                    encode_tree(w, &progress_record(progress, total - row_num, total))?;
                    progress += 1;
                }
                w.flush()?;
            }

            if report_progress {
                encode_tree(w, &progress_record(progress, total, total))?;
                w.flush()?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            tracing::error!(error = %err, "error streaming metrics");
        }
        Ok(())
    }

    /// Stream the alignment series for each requested (run, metric) window.
    pub async fn search_aligned<W: Write>(
        &self,
        req: &AlignedMetricsRequest,
        w: &mut W,
    ) -> ApiResult<()> {
        let mut requests = Vec::new();
        for run in &req.runs {
            for trace in &run.traces {
                requests.push(AlignRequest {
                    run_id: run.run_id.clone(),
                    key: trace.name.clone(),
                    steps: trace.slice[2] as f32,
                });
            }
        }
        let rows = self.store.aligned_metrics(&requests, &req.align_by).await?;

        let outcome: std::io::Result<()> = (|| {
            let mut run_id = String::new();
            let mut key = String::new();
            let mut metrics: Vec<TreeValue> = Vec::new();
            let mut values: Vec<f64> = Vec::new();
            let mut iters: Vec<f64> = Vec::new();

            macro_rules! push_series {
                () => {
                    if !key.is_empty() {
                        metrics.push(TreeValue::map([
                            ("name", TreeValue::from(key.clone())),
                            ("context", TreeValue::Map(Vec::new())),
                            ("x_axis_values", numpy_f64(&values)),
                            ("x_axis_iters", numpy_f64(&iters)),
                        ]));
                    }
                };
            }

            for row in &rows {
                if row.run_uuid != run_id || row.key != key {
                    push_series!();
                    if row.run_uuid != run_id {
                        if !run_id.is_empty() {
                            encode_tree(
                                w,
                                &TreeValue::map([(
                                    run_id.clone(),
                                    TreeValue::List(std::mem::take(&mut metrics)),
                                )]),
                            )?;
                            w.flush()?;
                        }
                        metrics = Vec::new();
                        run_id = row.run_uuid.clone();
                    }
                    key = row.key.clone();
                    values = Vec::new();
                    iters = Vec::new();
                }
                values.push(if row.is_nan { f64::NAN } else { row.value });
                iters.push(row.iter as f64);
            }

            push_series!();
            if !run_id.is_empty() {
                encode_tree(
                    w,
                    &TreeValue::map([(run_id.clone(), TreeValue::List(metrics))]),
                )?;
                w.flush()?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            tracing::error!(error = %err, "error streaming aligned metrics");
        }
        Ok(())
    }

    // =========================================================================
    // Dashboards and apps
    // =========================================================================

    pub async fn list_apps(&self) -> ApiResult<Vec<AppResponse>> {
        let apps = self.store.list_apps().await?;
        Ok(apps.iter().map(app_response).collect())
    }

    pub async fn create_app(&self, req: &CreateAppRequest) -> ApiResult<AppResponse> {
        let now = current_time_ms();
        let app = AppRow {
            id: Uuid::new_v4(),
            app_type: req.app_type.clone(),
            state: req.state.to_string(),
            created_at: now,
            updated_at: now,
            is_archived: false,
        };
        self.store.create_app(&app).await?;
        Ok(app_response(&app))
    }

    pub async fn get_app(&self, app_id: &str) -> ApiResult<AppResponse> {
        let id = parse_uuid(app_id)?;
        let app = self.store.get_app(id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find app '{app_id}'"))
        })?;
        Ok(app_response(&app))
    }

    pub async fn update_app(&self, app_id: &str, state: &serde_json::Value) -> ApiResult<()> {
        let id = parse_uuid(app_id)?;
        self.store
            .update_app_state(id, &state.to_string(), current_time_ms())
            .await?;
        Ok(())
    }

    pub async fn delete_app(&self, app_id: &str) -> ApiResult<()> {
        let id = parse_uuid(app_id)?;
        self.store.archive_app(id, current_time_ms()).await?;
        Ok(())
    }

    pub async fn list_dashboards(&self) -> ApiResult<Vec<DashboardResponse>> {
        let dashboards = self.store.list_dashboards().await?;
        Ok(dashboards.iter().map(dashboard_response).collect())
    }

    pub async fn create_dashboard(
        &self,
        req: &CreateDashboardRequest,
    ) -> ApiResult<DashboardResponse> {
        if let Some(app_id) = req.app_id {
            self.store.get_app(app_id).await?.ok_or_else(|| {
                ApiError::ResourceDoesNotExist(format!("unable to find app '{app_id}'"))
            })?;
        }
        let now = current_time_ms();
        let dashboard = DashboardRow {
            id: Uuid::new_v4(),
            app_id: req.app_id,
            name: req.name.clone(),
            description: req.description.clone(),
            created_at: now,
            updated_at: now,
            is_archived: false,
        };
        self.store.create_dashboard(&dashboard).await?;
        Ok(dashboard_response(&dashboard))
    }

    pub async fn get_dashboard(&self, dashboard_id: &str) -> ApiResult<DashboardResponse> {
        let id = parse_uuid(dashboard_id)?;
        let dashboard = self.store.get_dashboard(id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find dashboard '{dashboard_id}'"))
        })?;
        Ok(dashboard_response(&dashboard))
    }

    pub async fn update_dashboard(
        &self,
        dashboard_id: &str,
        req: &UpdateDashboardRequest,
    ) -> ApiResult<DashboardResponse> {
        let id = parse_uuid(dashboard_id)?;
        let dashboard = self.store.get_dashboard(id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find dashboard '{dashboard_id}'"))
        })?;
        let name = req.name.clone().unwrap_or(dashboard.name);
        let description = req.description.clone().unwrap_or(dashboard.description);
        self.store
            .update_dashboard(id, &name, &description, current_time_ms())
            .await?;
        self.get_dashboard(dashboard_id).await
    }

    pub async fn delete_dashboard(&self, dashboard_id: &str) -> ApiResult<()> {
        let id = parse_uuid(dashboard_id)?;
        self.store
            .archive_dashboard(id, current_time_ms())
            .await?;
        Ok(())
    }
}

fn parse_uuid(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| ApiError::InvalidParameterValue(format!("unable to parse id '{raw}': {e}")))
}

fn progress_record(index: usize, done: i64, total: i64) -> TreeValue {
    TreeValue::map([(
        format!("progress_{index}"),
        TreeValue::List(vec![TreeValue::Int(done), TreeValue::Int(total)]),
    )])
}

fn run_props_tree(run: &RunWithExperiment) -> TreeValue {
    TreeValue::map([
        ("name", TreeValue::from(run.run.name.clone())),
        ("description", TreeValue::Null),
        (
            "experiment",
            TreeValue::map([
                ("id", TreeValue::from(run.run.experiment_id.to_string())),
                ("name", TreeValue::from(run.experiment_name.clone())),
            ]),
        ),
        ("tags", TreeValue::List(Vec::new())),
        (
            "creation_time",
            TreeValue::Float(run.run.start_time.unwrap_or(0) as f64 / 1000.0),
        ),
        (
            "end_time",
            TreeValue::Float(run.run.end_time.unwrap_or(0) as f64 / 1000.0),
        ),
        (
            "archived",
            TreeValue::Bool(run.run.lifecycle_stage == LifecycleStage::Deleted),
        ),
        (
            "active",
            TreeValue::Bool(run.run.status == RunStatus::Running),
        ),
    ])
}

fn run_props_json(run: &RunWithExperiment) -> serde_json::Value {
    serde_json::json!({
        "name": run.run.name,
        "description": null,
        "experiment": {
            "id": run.run.experiment_id.to_string(),
            "name": run.experiment_name,
        },
        "tags": [],
        "creation_time": run.run.start_time.unwrap_or(0) as f64 / 1000.0,
        "end_time": run.run.end_time.unwrap_or(0) as f64 / 1000.0,
        "archived": run.run.lifecycle_stage == LifecycleStage::Deleted,
        "active": run.run.status == RunStatus::Running,
    })
}

fn latest_traces_tree(latest: &[LatestMetricRow]) -> TreeValue {
    TreeValue::List(
        latest
            .iter()
            .map(|metric| {
                TreeValue::map([
                    ("context", TreeValue::Map(Vec::new())),
                    ("name", TreeValue::from(metric.key.clone())),
                    (
                        "last_value",
                        TreeValue::map([
                            ("dtype", TreeValue::from("float")),
                            ("first_step", TreeValue::Int(0)),
                            ("last_step", TreeValue::Int(metric.last_iter)),
                            (
                                "last",
                                TreeValue::Float(if metric.is_nan {
                                    f64::NAN
                                } else {
                                    metric.value
                                }),
                            ),
                            ("version", TreeValue::Int(2)),
                        ]),
                    ),
                ])
            })
            .collect(),
    )
}

fn params_tree(params: &[ParamRow], tags: &[TagRow]) -> TreeValue {
    let mut entries: Vec<(String, TreeValue)> = params
        .iter()
        .map(|param| (param.key.clone(), param_tree_value(param)))
        .collect();
    entries.push((
        "tags".to_string(),
        TreeValue::Map(
            tags.iter()
                .map(|tag| (tag.key.clone(), TreeValue::from(tag.value.clone())))
                .collect(),
        ),
    ));
    TreeValue::Map(entries)
}

fn param_tree_value(param: &ParamRow) -> TreeValue {
    use tracklab_metadata::models::ParamValue;
    match param.value() {
        ParamValue::Int(v) => TreeValue::Int(v),
        ParamValue::Float(v) => TreeValue::Float(v),
        ParamValue::Str(v) => TreeValue::Str(v),
    }
}

fn param_json_value(param: &ParamRow) -> serde_json::Value {
    use tracklab_metadata::models::ParamValue;
    match param.value() {
        ParamValue::Int(v) => serde_json::Value::from(v),
        ParamValue::Float(v) => serde_json::Value::from(v),
        ParamValue::Str(v) => serde_json::Value::from(v),
    }
}

fn json_float(value: f64, is_nan: bool) -> serde_json::Value {
    if is_nan {
        serde_json::Value::Null
    } else {
        serde_json::Value::from(value)
    }
}

fn group_params(rows: Vec<ParamRow>) -> HashMap<String, Vec<ParamRow>> {
    let mut grouped: HashMap<String, Vec<ParamRow>> = HashMap::new();
    for row in rows {
        grouped.entry(row.run_uuid.clone()).or_default().push(row);
    }
    grouped
}

fn group_tags(rows: Vec<TagRow>) -> HashMap<String, Vec<TagRow>> {
    let mut grouped: HashMap<String, Vec<TagRow>> = HashMap::new();
    for row in rows {
        grouped.entry(row.run_uuid.clone()).or_default().push(row);
    }
    grouped
}

fn group_latest(rows: Vec<LatestMetricRow>) -> HashMap<String, Vec<LatestMetricRow>> {
    let mut grouped: HashMap<String, Vec<LatestMetricRow>> = HashMap::new();
    for row in rows {
        grouped.entry(row.run_uuid.clone()).or_default().push(row);
    }
    grouped
}

fn app_response(app: &AppRow) -> AppResponse {
    AppResponse {
        id: app.id.to_string(),
        app_type: app.app_type.clone(),
        state: serde_json::from_str(&app.state).unwrap_or(serde_json::Value::Null),
        created_at: app.created_at,
        updated_at: app.updated_at,
    }
}

fn dashboard_response(dashboard: &DashboardRow) -> DashboardResponse {
    DashboardResponse {
        id: dashboard.id.to_string(),
        app_id: dashboard.app_id.map(|id| id.to_string()),
        name: dashboard.name.clone(),
        description: dashboard.description.clone(),
        created_at: dashboard.created_at,
        updated_at: dashboard.updated_at,
    }
}

/// Day bucket key for the activity map: "YYYY-MM-DDT00:00:00".
fn day_key(ms: i64) -> String {
    let days = ms.div_euclid(86_400_000);
    let (year, month, day) = civil_from_days(days);
    format!("{year:04}-{month:02}-{day:02}T00:00:00")
}

/// Civil date from days since the Unix epoch.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    (
        if month <= 2 { year + 1 } else { year },
        month as u32,
        day as u32,
    )
}
