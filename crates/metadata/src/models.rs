//! Database models mapping to the metadata schema.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// Enumerations
// =============================================================================

/// Run execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Scheduled,
    Running,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(Self::Scheduled),
            "RUNNING" => Some(Self::Running),
            "FINISHED" => Some(Self::Finished),
            "FAILED" => Some(Self::Failed),
            "KILLED" => Some(Self::Killed),
            _ => None,
        }
    }
}

/// Lifecycle stage shared by experiments and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LifecycleStage {
    Active,
    Deleted,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

// =============================================================================
// Experiments
// =============================================================================

/// Experiment record.
#[derive(Debug, Clone, FromRow)]
pub struct ExperimentRow {
    pub experiment_id: i32,
    pub name: String,
    pub artifact_location: String,
    pub lifecycle_stage: LifecycleStage,
    pub creation_time: Option<i64>,
    pub last_update_time: Option<i64>,
}

/// Experiment tag record.
#[derive(Debug, Clone, FromRow)]
pub struct ExperimentTagRow {
    pub experiment_id: i32,
    pub key: String,
    pub value: String,
}

/// Experiment with its active-run count, for dashboard listings.
#[derive(Debug, Clone, FromRow)]
pub struct ExperimentSummary {
    pub experiment_id: i32,
    pub name: String,
    pub lifecycle_stage: LifecycleStage,
    pub creation_time: Option<i64>,
    pub run_count: i64,
}

// =============================================================================
// Runs
// =============================================================================

/// Run record.
///
/// `row_num` is a dense 0-based ordinal over all runs, monotone in creation
/// order; deletes renumber survivors to keep it contiguous.
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub run_uuid: String,
    pub name: String,
    pub source_type: String,
    pub source_name: String,
    pub entry_point_name: String,
    pub user_id: String,
    pub status: RunStatus,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub source_version: String,
    pub lifecycle_stage: LifecycleStage,
    pub artifact_uri: String,
    pub experiment_id: i32,
    pub deleted_time: Option<i64>,
    pub row_num: i64,
}

/// Run joined with its experiment's name, for dashboard responses.
#[derive(Debug, Clone, FromRow)]
pub struct RunWithExperiment {
    #[sqlx(flatten)]
    pub run: RunRow,
    pub experiment_name: String,
}

// =============================================================================
// Params
// =============================================================================

/// A typed parameter value: exactly one of int, float, or string.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Parse a client-supplied raw value: integer first, then finite float,
    /// otherwise string.
    pub fn parse(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            if v.is_finite() {
                return Self::Float(v);
            }
        }
        Self::Str(raw.to_string())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Param record. At most one of the three value columns is set.
#[derive(Debug, Clone, FromRow)]
pub struct ParamRow {
    pub run_uuid: String,
    pub key: String,
    pub value_int: Option<i64>,
    pub value_float: Option<f64>,
    pub value_str: Option<String>,
}

impl ParamRow {
    pub fn new(run_uuid: impl Into<String>, key: impl Into<String>, value: ParamValue) -> Self {
        let (value_int, value_float, value_str) = match value {
            ParamValue::Int(v) => (Some(v), None, None),
            ParamValue::Float(v) => (None, Some(v), None),
            ParamValue::Str(v) => (None, None, Some(v)),
        };
        Self {
            run_uuid: run_uuid.into(),
            key: key.into(),
            value_int,
            value_float,
            value_str,
        }
    }

    /// The typed value carried by this row.
    pub fn value(&self) -> ParamValue {
        if let Some(v) = self.value_int {
            ParamValue::Int(v)
        } else if let Some(v) = self.value_float {
            ParamValue::Float(v)
        } else {
            ParamValue::Str(self.value_str.clone().unwrap_or_default())
        }
    }
}

/// A rejected param write: the key exists for the run with a different value.
#[derive(Debug, Clone, FromRow)]
pub struct ParamConflict {
    pub run_uuid: String,
    pub key: String,
    pub old_value: String,
    pub new_value: String,
}

impl std::fmt::Display for ParamConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{run_id: {}, key: {}, old_value: {}, new_value: {}}}",
            self.run_uuid, self.key, self.old_value, self.new_value
        )
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Run tag record. Overwrites on conflict.
#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    pub run_uuid: String,
    pub key: String,
    pub value: String,
}

// =============================================================================
// Metrics
// =============================================================================

/// One metric observation. `iter` is the insertion ordinal within
/// (run_uuid, key). NaN observations store `is_nan = true` and `value = 0`.
#[derive(Debug, Clone, FromRow)]
pub struct MetricRow {
    pub run_uuid: String,
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
    pub is_nan: bool,
    pub iter: i64,
}

/// Per-(run, key) summary of the highest-step observation.
#[derive(Debug, Clone, FromRow)]
pub struct LatestMetricRow {
    pub run_uuid: String,
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
    pub is_nan: bool,
    pub last_iter: i64,
}

/// Metric row joined with an optional x-axis alignment metric.
#[derive(Debug, Clone, FromRow)]
pub struct MetricWithXAxis {
    #[sqlx(flatten)]
    pub metric: MetricRow,
    pub x_axis_value: Option<f64>,
    pub x_axis_is_nan: Option<bool>,
}

// =============================================================================
// Dashboards and apps
// =============================================================================

/// Dashboard app record. State is an opaque JSON document.
#[derive(Debug, Clone, FromRow)]
pub struct AppRow {
    pub id: Uuid,
    pub app_type: String,
    pub state: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_archived: bool,
}

/// Dashboard record, optionally associated with an app.
#[derive(Debug, Clone, FromRow)]
pub struct DashboardRow {
    pub id: Uuid,
    pub app_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_archived: bool,
}
