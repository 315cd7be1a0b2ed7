//! Artifact storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming artifact reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// One entry under an artifact location: a file with its size, or a
/// directory. Paths are relative to the run's artifact root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactObject {
    pub path: String,
    pub size: Option<i64>,
    pub is_dir: bool,
}

/// Uniform artifact storage surface over the supported backends.
///
/// `artifact_uri` is the run's artifact root (`file://...`, a bare path, or
/// `s3://bucket/key`); `path` selects a file or directory beneath it and
/// must not escape the root.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stream one artifact's content.
    async fn get(&self, artifact_uri: &str, path: &str) -> StorageResult<ByteStream>;

    /// List artifacts directly under the given path.
    async fn list(&self, artifact_uri: &str, path: &str) -> StorageResult<Vec<ArtifactObject>>;
}

/// Reject relative paths that escape the artifact root. Applied before any
/// backend touches the path.
pub fn validate_relative_path(path: &str) -> StorageResult<()> {
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(crate::error::StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}
