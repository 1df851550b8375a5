use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Blob storage addressed by (container, key).
///
/// `get` fails with [`PipelineError::NotFound`] when the key is absent and
/// with [`PipelineError::TransientStore`] on availability problems. Requests
/// the store refuses outright fail with [`PipelineError::StoreRejected`].
/// Puts overwrite atomically per key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<()>;

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            endpoint_url = ?config.endpoint_url,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }

    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }

    /// Get the S3 client
    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading s3://{}/{}", container, key);

        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| store_error(e, container, key))?;

        let body = output.body.collect().await.map_err(|e| {
            PipelineError::TransientStore(format!("{}/{}: body read failed: {}", container, key, e))
        })?;

        Ok(body.into_bytes().to_vec())
    }

    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| store_error(e, container, key))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(container)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| store_error(e, container, prefix))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

/// Map an SDK failure onto the pipeline taxonomy.
///
/// Missing keys and buckets are `NotFound`. Any other 4xx except 408 and 429
/// is a permanent rejection; everything else may succeed on redelivery.
fn store_error<E>(err: SdkError<E, HttpResponse>, container: &str, key: &str) -> PipelineError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let detail = || format!("{}/{}: {}", container, key, DisplayErrorContext(&err));

    match (err.code(), status) {
        (Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound"), _) | (_, Some(404)) => {
            PipelineError::not_found(container, key)
        }
        (_, Some(408) | Some(429)) => PipelineError::TransientStore(detail()),
        (_, Some(400..=499)) => PipelineError::StoreRejected(detail()),
        _ => PipelineError::TransientStore(detail()),
    }
}

/// A stored blob and its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Process-local object store for tests and offline runs
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, container: &str, key: &str, bytes: Vec<u8>, content_type: &str) {
        self.objects.write().insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Every (container, key) pair currently stored, in order
    pub fn keys(&self) -> Vec<(String, String)> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        self.object(container, key)
            .map(|object| object.bytes)
            .ok_or_else(|| PipelineError::not_found(container, key))
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.insert(container, key, bytes, content_type);
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}
