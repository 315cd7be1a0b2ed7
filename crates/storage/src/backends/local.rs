//! Local filesystem artifact storage.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ArtifactObject, ArtifactStore, ByteStream, validate_relative_path};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem artifact store. Artifact URIs use the `file` scheme or
/// a bare path.
#[derive(Debug, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the artifact URI plus relative path into a filesystem path.
    fn resolve(&self, artifact_uri: &str, path: &str) -> StorageResult<PathBuf> {
        validate_relative_path(path)?;
        let root = artifact_uri
            .strip_prefix("file://")
            .unwrap_or(artifact_uri);
        if root.is_empty() {
            return Err(StorageError::InvalidUri(artifact_uri.to_string()));
        }
        let mut full = PathBuf::from(root);
        if !path.is_empty() {
            full.push(path);
        }
        Ok(full)
    }

    async fn object_for(&self, entry_path: &Path, relative: String) -> StorageResult<ArtifactObject> {
        let meta = fs::metadata(entry_path).await?;
        Ok(if meta.is_dir() {
            ArtifactObject {
                path: relative,
                size: None,
                is_dir: true,
            }
        } else {
            ArtifactObject {
                path: relative,
                size: Some(meta.len() as i64),
                is_dir: false,
            }
        })
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn get(&self, artifact_uri: &str, path: &str) -> StorageResult<ByteStream> {
        let full = self.resolve(artifact_uri, path)?;
        let file = fs::File::open(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, artifact_uri: &str, path: &str) -> StorageResult<Vec<ArtifactObject>> {
        let full = self.resolve(artifact_uri, path)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if !meta.is_dir() {
            return Ok(vec![ArtifactObject {
                path: path.to_string(),
                size: Some(meta.len() as i64),
                is_dir: false,
            }]);
        }

        let mut objects = Vec::new();
        let mut entries = fs::read_dir(&full).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let relative = if path.is_empty() {
                name
            } else {
                format!("{path}/{name}")
            };
            objects.push(self.object_for(&entry.path(), relative).await?);
        }
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_file_scheme() {
        let storage = LocalStorage::new();
        let full = storage.resolve("file:///data/artifacts", "model/a.bin").unwrap();
        assert_eq!(full, PathBuf::from("/data/artifacts/model/a.bin"));

        let full = storage.resolve("/data/artifacts", "").unwrap();
        assert_eq!(full, PathBuf::from("/data/artifacts"));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let storage = LocalStorage::new();
        assert!(matches!(
            storage.resolve("/data", "foo/../bar"),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
