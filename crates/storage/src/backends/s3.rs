//! S3-compatible artifact storage using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ArtifactObject, ArtifactStore, ByteStream, validate_relative_path};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use tracklab_core::config::ArtifactConfig;

/// S3 artifact store. Credentials and region come from the AWS-standard
/// environment; an explicit endpoint can be configured for S3-compatible
/// services.
pub struct S3Storage {
    client: Client,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage").finish_non_exhaustive()
    }
}

impl S3Storage {
    /// Create a new S3 store from the artifact configuration.
    pub async fn new(config: &ArtifactConfig) -> StorageResult<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.s3_endpoint {
            // bare host:port endpoints (e.g. "minio:9000") get a scheme
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://")
            {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.s3_force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    #[cfg(test)]
    pub(crate) fn key_for(artifact_uri: &str, path: &str) -> StorageResult<(String, String)> {
        let (bucket, root) = parse_s3_uri(artifact_uri)?;
        Ok((bucket, join_key(&root, path)))
    }
}

/// Split `s3://bucket/key` into bucket and key prefix.
pub(crate) fn parse_s3_uri(uri: &str) -> StorageResult<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
    let (bucket, key) = match rest.split_once('/') {
        Some((bucket, key)) => (bucket, key.trim_end_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(StorageError::InvalidUri(uri.to_string()));
    }
    Ok((bucket.to_string(), key.to_string()))
}

fn join_key(root: &str, path: &str) -> String {
    match (root.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => root.to_string(),
        _ => format!("{root}/{path}"),
    }
}

#[async_trait]
impl ArtifactStore for S3Storage {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, artifact_uri: &str, path: &str) -> StorageResult<ByteStream> {
        validate_relative_path(path)?;
        let (bucket, root) = parse_s3_uri(artifact_uri)?;
        let key = join_key(&root, path);

        let output = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| {
                if let aws_sdk_s3::error::SdkError::ServiceError(service_err) = &err {
                    if service_err.raw().status().as_u16() == 404 {
                        return StorageError::NotFound(path.to_string());
                    }
                }
                StorageError::S3(Box::new(err))
            })?;

        let reader = output.body.into_async_read();
        let stream = ReaderStream::new(reader).map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, artifact_uri: &str, path: &str) -> StorageResult<Vec<ArtifactObject>> {
        validate_relative_path(path)?;
        let (bucket, root) = parse_s3_uri(artifact_uri)?;
        let key = join_key(&root, path);
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        // paths in the response are relative to the artifact root
        let strip = if root.is_empty() {
            String::new()
        } else {
            format!("{root}/")
        };

        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&bucket)
                .delimiter("/")
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|err| StorageError::S3(Box::new(err)))?;

            // directories synthesised from common prefixes
            for common in output.common_prefixes() {
                if let Some(dir) = common.prefix() {
                    let relative = dir
                        .strip_prefix(&strip)
                        .unwrap_or(dir)
                        .trim_end_matches('/')
                        .to_string();
                    objects.push(ArtifactObject {
                        path: relative,
                        size: None,
                        is_dir: true,
                    });
                }
            }
            for object in output.contents() {
                let Some(object_key) = object.key() else {
                    continue;
                };
                let relative = object_key.strip_prefix(&strip).unwrap_or(object_key);
                objects.push(ArtifactObject {
                    path: relative.to_string(),
                    size: object.size(),
                    is_dir: false,
                });
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }
}
