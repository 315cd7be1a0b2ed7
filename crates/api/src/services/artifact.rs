//! Artifact workflows: list and fetch files under a run's artifact root.

use crate::error::{ApiError, ApiResult};
use crate::response::{ArtifactFileResponse, ListArtifactsResponse};
use crate::services::require;
use std::sync::Arc;
use tracklab_metadata::MetadataStore;
use tracklab_metadata::repos::RunRepo;
use tracklab_storage::{ArtifactStorageFactory, ByteStream, validate_relative_path};

/// Service for artifact operations.
pub struct ArtifactService {
    store: Arc<dyn MetadataStore>,
    storage: Arc<ArtifactStorageFactory>,
}

impl ArtifactService {
    pub fn new(store: Arc<dyn MetadataStore>, storage: Arc<ArtifactStorageFactory>) -> Self {
        Self { store, storage }
    }

    /// List artifacts directly under `path` for a run.
    pub async fn list_artifacts(
        &self,
        run_id: &str,
        path: &str,
    ) -> ApiResult<ListArtifactsResponse> {
        let root_uri = self.artifact_root(run_id, path).await?;
        let backend = self.storage.get_storage(&root_uri).await?;
        let objects = backend.list(&root_uri, path).await?;
        Ok(ListArtifactsResponse {
            root_uri,
            files: objects
                .into_iter()
                .map(|object| ArtifactFileResponse {
                    path: object.path,
                    file_size: object.size,
                    is_dir: object.is_dir,
                })
                .collect(),
        })
    }

    /// Stream one artifact's bytes.
    pub async fn get_artifact(&self, run_id: &str, path: &str) -> ApiResult<ByteStream> {
        require(path, "path")?;
        let root_uri = self.artifact_root(run_id, path).await?;
        let backend = self.storage.get_storage(&root_uri).await?;
        Ok(backend.get(&root_uri, path).await?)
    }

    async fn artifact_root(&self, run_id: &str, path: &str) -> ApiResult<String> {
        require(run_id, "run_id")?;
        // surface traversal as an invalid parameter before touching storage
        validate_relative_path(path)
            .map_err(|_| {
                ApiError::InvalidParameterValue(
                    "provided 'path' parameter is invalid".to_string(),
                )
            })?;
        let run = self.store.get_run(run_id).await?.ok_or_else(|| {
            ApiError::ResourceDoesNotExist(format!("unable to find run '{run_id}'"))
        })?;
        Ok(run.artifact_uri)
    }
}
