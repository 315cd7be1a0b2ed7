//! Service layer: transactional workflows over the repositories.

pub mod artifact;
pub mod dashboard;
pub mod experiment;
pub mod run;

pub use artifact::ArtifactService;
pub use dashboard::DashboardService;
pub use experiment::ExperimentService;
pub use run::RunService;

use crate::error::{ApiError, ApiResult};

/// Wall-clock now in milliseconds since the epoch.
pub(crate) fn current_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate a required string field.
pub(crate) fn require(value: &str, field: &str) -> ApiResult<()> {
    if value.is_empty() {
        return Err(ApiError::InvalidParameterValue(format!(
            "Missing value for required parameter '{field}'"
        )));
    }
    Ok(())
}
