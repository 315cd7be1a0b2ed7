//! Metadata store error types.

use crate::models::ParamConflict;
use thiserror::Error;

fn format_conflicts(conflicts: &[ParamConflict]) -> String {
    let rendered: Vec<String> = conflicts.iter().map(|c| c.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("conflicting params found: {}", format_conflicts(.0))]
    ParamConflict(Vec<ParamConflict>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_conflict_message_lists_each_conflict() {
        let err = MetadataError::ParamConflict(vec![ParamConflict {
            run_uuid: "r1".to_string(),
            key: "lr".to_string(),
            old_value: "0.1".to_string(),
            new_value: "0.2".to_string(),
        }]);
        let msg = err.to_string();
        assert!(msg.contains("conflicting params found"));
        assert!(msg.contains("{run_id: r1, key: lr, old_value: 0.1, new_value: 0.2}"));
    }
}
