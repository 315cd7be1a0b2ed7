//! Configuration types shared across crates.
//!
//! Values are produced by the host process (flags, environment, files);
//! this crate only defines their shape and defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds (default: 5).
        busy_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (`postgres://...`).
        url: String,
        /// Maximum pool connections (default: 10).
        max_connections: Option<u32>,
        /// Per-statement timeout in milliseconds.
        statement_timeout_ms: Option<u64>,
    },
}

/// Artifact storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Default artifact root for new experiments. May be a bare path,
    /// a `file://` URI, or an `s3://bucket/prefix` URI.
    #[serde(default = "default_artifact_root")]
    pub root: String,
    /// Optional S3-compatible endpoint (for MinIO, etc.). Credentials and
    /// region come from the AWS-standard environment.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    /// Use path-style S3 URLs. Required for MinIO and most S3-compatible
    /// services.
    #[serde(default)]
    pub s3_force_path_style: bool,
}

fn default_artifact_root() -> String {
    "./artifacts".to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
            s3_endpoint: None,
            s3_force_path_style: false,
        }
    }
}

/// Top-level service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Metadata database.
    pub metadata: MetadataConfig,
    /// Artifact storage.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

fn default_listen_address() -> String {
    "127.0.0.1:5000".to_string()
}
