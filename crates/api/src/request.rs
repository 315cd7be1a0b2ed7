//! Parsed request bodies for the tracking and dashboard APIs. The HTTP
//! layer decodes these and hands them to the services.

use serde::Deserialize;

// =============================================================================
// Tracking API
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyValueRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateExperimentRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default)]
    pub tags: Vec<KeyValueRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExperimentRequest {
    #[serde(default)]
    pub experiment_id: String,
    #[serde(default)]
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchExperimentsRequest {
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub view_type: String,
    #[serde(default)]
    pub max_results: i64,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRunRequest {
    #[serde(default)]
    pub experiment_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub run_name: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub tags: Vec<KeyValueRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRunRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub run_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRunsRequest {
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub run_view_type: String,
    #[serde(default)]
    pub max_results: i64,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// A metric value on the wire: a JSON number, or one of the literal strings
/// `"NaN"`, `"Infinity"`, `"-Infinity"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl Default for MetricValue {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

impl MetricValue {
    /// Convert to the stored (value, is_nan) pair. NaN stores a zero value
    /// with the flag set; infinities clamp to the representable extremes.
    pub fn to_stored(&self) -> Result<(f64, bool), String> {
        match self {
            Self::Number(v) if v.is_nan() => Ok((0.0, true)),
            Self::Number(v) => Ok((*v, false)),
            Self::Text(s) => match s.as_str() {
                "NaN" => Ok((0.0, true)),
                "Infinity" => Ok((f64::MAX, false)),
                "-Infinity" => Ok((f64::MIN, false)),
                other => other
                    .parse::<f64>()
                    .map(|v| if v.is_nan() { (0.0, true) } else { (v, false) })
                    .map_err(|_| format!("invalid metric value '{other}'")),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogMetricRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: MetricValue,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogParamRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetRunTagRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRunTagRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: MetricValue,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogBatchRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub metrics: Vec<MetricRequest>,
    #[serde(default)]
    pub params: Vec<KeyValueRequest>,
    #[serde(default)]
    pub tags: Vec<KeyValueRequest>,
}

// =============================================================================
// Dashboard API
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RunSearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: String,
    /// Accepted for wire compatibility; currently unused.
    #[serde(default)]
    pub skip_system: bool,
    #[serde(default = "default_true")]
    pub report_progress: bool,
    #[serde(default)]
    pub exclude_params: bool,
    #[serde(default)]
    pub exclude_traces: bool,
}

impl Default for RunSearchQuery {
    fn default() -> Self {
        Self {
            q: String::new(),
            limit: 0,
            offset: String::new(),
            skip_system: false,
            report_progress: true,
            exclude_params: false,
            exclude_traces: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSearchQuery {
    #[serde(default)]
    pub q: String,
    /// Requested number of points per series.
    #[serde(default = "default_steps", rename = "p")]
    pub steps: i64,
    #[serde(default)]
    pub x_axis: Option<String>,
    /// Accepted for wire compatibility; currently unused.
    #[serde(default)]
    pub skip_system: bool,
    #[serde(default = "default_true")]
    pub report_progress: bool,
}

impl Default for MetricSearchQuery {
    fn default() -> Self {
        Self {
            q: String::new(),
            steps: default_steps(),
            x_axis: None,
            skip_system: false,
            report_progress: true,
        }
    }
}

fn default_steps() -> i64 {
    50
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlignedTraceRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slice: [i64; 3],
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlignedRunRequest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub traces: Vec<AlignedTraceRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlignedMetricsRequest {
    #[serde(default)]
    pub align_by: String,
    #[serde(default)]
    pub runs: Vec<AlignedRunRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardUpdateRunRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricIdentifier {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAppRequest {
    #[serde(rename = "type", default)]
    pub app_type: String,
    #[serde(default)]
    pub state: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDashboardRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub app_id: Option<uuid::Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDashboardRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_decodes_numbers_and_markers() {
        let v: MetricValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(v.to_stored().unwrap(), (0.25, false));

        let v: MetricValue = serde_json::from_str("\"NaN\"").unwrap();
        assert_eq!(v.to_stored().unwrap(), (0.0, true));

        let v: MetricValue = serde_json::from_str("\"Infinity\"").unwrap();
        assert_eq!(v.to_stored().unwrap(), (f64::MAX, false));

        let v: MetricValue = serde_json::from_str("\"-Infinity\"").unwrap();
        assert_eq!(v.to_stored().unwrap(), (f64::MIN, false));

        let v: MetricValue = serde_json::from_str("\"0.5\"").unwrap();
        assert_eq!(v.to_stored().unwrap(), (0.5, false));

        let v: MetricValue = serde_json::from_str("\"bogus\"").unwrap();
        assert!(v.to_stored().is_err());
    }

    #[test]
    fn search_query_defaults_report_progress_on() {
        let q: RunSearchQuery = serde_json::from_str("{}").unwrap();
        assert!(q.report_progress);
        assert!(!q.skip_system);

        let q: MetricSearchQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.steps, 50);
    }
}
