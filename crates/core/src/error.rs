//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("invalid metric value: {0}")]
    InvalidMetricValue(String),

    #[error("invalid artifact uri: {0}")]
    InvalidArtifactUri(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
