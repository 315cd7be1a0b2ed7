//! Artifact storage abstraction and backends for Tracklab.
//!
//! This crate provides:
//! - The [`ArtifactStore`] surface (`get` as a byte stream, `list` of
//!   objects) over a run's artifact URI
//! - Backends: local filesystem and S3-compatible
//! - A factory caching one backend instance per URI scheme

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{local::LocalStorage, s3::S3Storage};
pub use error::{StorageError, StorageResult};
pub use traits::{ArtifactObject, ArtifactStore, ByteStream, validate_relative_path};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracklab_core::config::ArtifactConfig;

/// URI scheme selecting the local filesystem backend.
pub const LOCAL_STORAGE_NAME: &str = "local";
/// URI scheme selecting the S3 backend.
pub const S3_STORAGE_NAME: &str = "s3";

/// Creates and caches artifact storage backends by URI scheme.
///
/// Backends are created lazily on first use; the mutex makes initialisation
/// at-most-once per scheme even under racing callers.
pub struct ArtifactStorageFactory {
    config: ArtifactConfig,
    storages: Mutex<HashMap<&'static str, Arc<dyn ArtifactStore>>>,
}

impl ArtifactStorageFactory {
    /// Create a new factory.
    pub fn new(config: ArtifactConfig) -> Self {
        Self {
            config,
            storages: Mutex::new(HashMap::new()),
        }
    }

    /// Return the storage backend for the given artifact URI.
    pub async fn get_storage(&self, artifact_uri: &str) -> StorageResult<Arc<dyn ArtifactStore>> {
        let scheme = scheme_of(artifact_uri)?;
        let mut storages = self.storages.lock().await;
        if let Some(storage) = storages.get(scheme) {
            return Ok(storage.clone());
        }
        let storage: Arc<dyn ArtifactStore> = match scheme {
            S3_STORAGE_NAME => Arc::new(S3Storage::new(&self.config).await?),
            _ => Arc::new(LocalStorage::new()),
        };
        storages.insert(scheme, storage.clone());
        Ok(storage)
    }
}

/// Map an artifact URI onto a backend scheme. Bare paths and `file://` URIs
/// are local; anything else with a scheme must be `s3://`.
fn scheme_of(artifact_uri: &str) -> StorageResult<&'static str> {
    match artifact_uri.split_once("://") {
        None | Some(("file", _)) => Ok(LOCAL_STORAGE_NAME),
        Some(("s3", _)) => Ok(S3_STORAGE_NAME),
        Some((other, _)) => Err(StorageError::Config(format!(
            "unsupported artifact scheme has been provided: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_map_to_backends() {
        assert_eq!(scheme_of("/tmp/artifacts").unwrap(), LOCAL_STORAGE_NAME);
        assert_eq!(scheme_of("file:///tmp/a").unwrap(), LOCAL_STORAGE_NAME);
        assert_eq!(scheme_of("s3://bucket/key").unwrap(), S3_STORAGE_NAME);
        assert!(scheme_of("gs://bucket").is_err());
    }

    #[tokio::test]
    async fn factory_caches_one_backend_per_scheme() {
        let factory = ArtifactStorageFactory::new(ArtifactConfig::default());
        let first = factory.get_storage("/tmp/a").await.unwrap();
        let second = factory.get_storage("file:///tmp/b").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
