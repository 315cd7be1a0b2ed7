//! Response bodies for the tracking and dashboard JSON endpoints.

use serde::Serialize;
use tracklab_metadata::models::{
    ExperimentRow, ExperimentSummary, ExperimentTagRow, LatestMetricRow, LifecycleStage, ParamRow,
    RunRow, TagRow,
};

// =============================================================================
// Tracking API
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentResponse {
    pub experiment_id: String,
    pub name: String,
    pub artifact_location: String,
    pub lifecycle_stage: LifecycleStage,
    pub creation_time: Option<i64>,
    pub last_update_time: Option<i64>,
    pub tags: Vec<KeyValueResponse>,
}

impl ExperimentResponse {
    pub fn from_row(experiment: &ExperimentRow, tags: &[ExperimentTagRow]) -> Self {
        Self {
            experiment_id: experiment.experiment_id.to_string(),
            name: experiment.name.clone(),
            artifact_location: experiment.artifact_location.clone(),
            lifecycle_stage: experiment.lifecycle_stage,
            creation_time: experiment.creation_time,
            last_update_time: experiment.last_update_time,
            tags: tags
                .iter()
                .map(|tag| KeyValueResponse {
                    key: tag.key.clone(),
                    value: tag.value.clone(),
                })
                .collect(),
        }
    }
}

/// A metric value on the wire; NaN re-emits as the literal string `"NaN"`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetricValueResponse {
    Number(f64),
    Text(&'static str),
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricResponse {
    pub key: String,
    pub value: MetricValueResponse,
    pub timestamp: i64,
    pub step: i64,
}

impl MetricResponse {
    pub fn from_latest(metric: &LatestMetricRow) -> Self {
        Self {
            key: metric.key.clone(),
            value: if metric.is_nan {
                MetricValueResponse::Text("NaN")
            } else {
                MetricValueResponse::Number(metric.value)
            },
            timestamp: metric.timestamp,
            step: metric.step,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfoResponse {
    pub run_id: String,
    /// Deprecated alias of run_id kept for client compatibility.
    pub run_uuid: String,
    pub run_name: String,
    pub experiment_id: String,
    pub user_id: String,
    pub status: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub artifact_uri: String,
    pub lifecycle_stage: LifecycleStage,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunDataResponse {
    pub metrics: Vec<MetricResponse>,
    pub params: Vec<KeyValueResponse>,
    pub tags: Vec<KeyValueResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub info: RunInfoResponse,
    pub data: RunDataResponse,
}

impl RunResponse {
    pub fn from_rows(
        run: &RunRow,
        params: &[ParamRow],
        tags: &[TagRow],
        latest_metrics: &[LatestMetricRow],
    ) -> Self {
        Self {
            info: RunInfoResponse {
                run_id: run.run_uuid.clone(),
                run_uuid: run.run_uuid.clone(),
                run_name: run.name.clone(),
                experiment_id: run.experiment_id.to_string(),
                user_id: run.user_id.clone(),
                status: run.status.as_str().to_string(),
                start_time: run.start_time,
                end_time: run.end_time,
                artifact_uri: run.artifact_uri.clone(),
                lifecycle_stage: run.lifecycle_stage,
            },
            data: RunDataResponse {
                metrics: latest_metrics.iter().map(MetricResponse::from_latest).collect(),
                params: params
                    .iter()
                    .map(|param| KeyValueResponse {
                        key: param.key.clone(),
                        value: param.value().to_string(),
                    })
                    .collect(),
                tags: tags
                    .iter()
                    .map(|tag| KeyValueResponse {
                        key: tag.key.clone(),
                        value: tag.value.clone(),
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRunsResponse {
    pub runs: Vec<RunResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchExperimentsResponse {
    pub experiments: Vec<ExperimentResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFileResponse {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListArtifactsResponse {
    pub root_uri: String,
    pub files: Vec<ArtifactFileResponse>,
}

// =============================================================================
// Dashboard API (JSON endpoints)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DashboardExperimentResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub archived: bool,
    pub run_count: i64,
    pub creation_time: f64,
}

impl DashboardExperimentResponse {
    pub fn from_summary(summary: &ExperimentSummary) -> Self {
        Self {
            id: summary.experiment_id.to_string(),
            name: summary.name.clone(),
            description: None,
            archived: summary.lifecycle_stage == LifecycleStage::Deleted,
            run_count: summary.run_count,
            creation_time: summary.creation_time.unwrap_or(0) as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRunResponse {
    pub run_id: String,
    pub name: String,
    pub creation_time: f64,
    pub end_time: Option<f64>,
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRunsResponse {
    pub id: String,
    pub runs: Vec<ExperimentRunResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentActivityResponse {
    pub num_runs: i64,
    pub num_archived_runs: i64,
    pub num_active_runs: i64,
    pub activity_map: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            id: None,
            status: "OK",
        }
    }

    pub fn ok_with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: "OK",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub app_type: String,
    pub state: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub id: String,
    pub app_id: Option<String>,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}
