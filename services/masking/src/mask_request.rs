//! Stage 1: request masks for uploaded images.
//!
//! For each "object created" notification on the upload bucket the model is
//! asked for a full-size and a thumbnail mask. Both masks and a correlation
//! record are written to the mask bucket; the record is written last, so its
//! notification only fires once the masks it names exist.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{dispatch, BatchReport, NotificationHandler, ObjectOutcome, S3Event, Stage};
use crate::inference::InferenceGateway;
use crate::keys::KeyLayout;
use crate::object_store::ObjectStore;
use crate::record::CorrelationRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub struct MaskRequestHandler {
    store: Arc<dyn ObjectStore>,
    inference: Arc<dyn InferenceGateway>,
    layout: KeyLayout,
    mask_bucket: String,
    default_thumbnail_size: (u32, u32),
}

impl MaskRequestHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        inference: Arc<dyn InferenceGateway>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            inference,
            layout: KeyLayout::from_config(config),
            mask_bucket: config.mask_bucket.clone(),
            default_thumbnail_size: config.default_thumbnail_dimensions(),
        }
    }

    /// Handle an upload notification batch
    pub async fn handle(&self, event: &S3Event) -> BatchReport {
        dispatch(self, event).await
    }

    async fn write(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let size = bytes.len();
        self.store
            .put(&self.mask_bucket, key, bytes, content_type)
            .await?;
        metrics::counter!("masking.bytes.written", "stage" => Stage::MaskRequest.as_str())
            .increment(size as u64);
        Ok(())
    }
}

#[async_trait]
impl NotificationHandler for MaskRequestHandler {
    fn stage(&self) -> Stage {
        Stage::MaskRequest
    }

    #[instrument(skip(self))]
    async fn handle_object(&self, bucket: &str, key: &str) -> Result<ObjectOutcome> {
        info!("Invoking inference for s3://{}/{}", bucket, key);

        let masks = self.inference.generate_masks(bucket, key).await?;
        let (width, height) = masks.thumbnail_size.unwrap_or(self.default_thumbnail_size);
        if width == 0 || height == 0 {
            return Err(PipelineError::Inference(format!(
                "thumbnail size {}x{} for {} must be non-zero",
                width, height, key
            )));
        }

        let mask_key = self.layout.mask_key(key);
        let thumbnail_mask_key = self.layout.thumbnail_mask_key(key);
        let record_key = self.layout.record_key(key);

        self.write(&mask_key, masks.mask_png, PNG_CONTENT_TYPE).await?;
        info!("Mask uploaded to s3://{}/{}", self.mask_bucket, mask_key);

        self.write(&thumbnail_mask_key, masks.thumbnail_mask_png, PNG_CONTENT_TYPE)
            .await?;
        info!(
            "Thumbnail mask uploaded to s3://{}/{}",
            self.mask_bucket, thumbnail_mask_key
        );

        let record = CorrelationRecord {
            source_bucket: bucket.to_string(),
            source_key: key.to_string(),
            mask_key,
            thumbnail_mask_key,
            thumbnail_size: Some([width, height]),
        };
        self.write(&record_key, record.to_vec()?, JSON_CONTENT_TYPE)
            .await?;
        info!("Mask metadata stored to s3://{}/{}", self.mask_bucket, record_key);

        Ok(ObjectOutcome::Processed)
    }
}
