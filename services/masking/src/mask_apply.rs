//! Stage 2: composite generated masks onto their source images.
//!
//! Reacts to correlation records landing in the mask bucket. Every output
//! key is derived from the record's source key, so re-handling a record
//! overwrites the same objects with the same bytes.

use crate::compositor::{apply_mask, decode_image, encode_png, make_thumbnail};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::{dispatch, BatchReport, NotificationHandler, ObjectOutcome, S3Event, Stage};
use crate::keys::KeyLayout;
use crate::mask_request::PNG_CONTENT_TYPE;
use crate::object_store::ObjectStore;
use crate::record::CorrelationRecord;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct MaskApplicationHandler {
    store: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    output_bucket: String,
    default_thumbnail_size: (u32, u32),
}

impl MaskApplicationHandler {
    pub fn new(store: Arc<dyn ObjectStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            layout: KeyLayout::from_config(config),
            output_bucket: config.output_bucket.clone(),
            default_thumbnail_size: config.default_thumbnail_dimensions(),
        }
    }

    /// Handle a mask bucket notification batch
    pub async fn handle(&self, event: &S3Event) -> BatchReport {
        dispatch(self, event).await
    }

    async fn load_image(&self, bucket: &str, key: &str) -> Result<DynamicImage> {
        info!("Downloading s3://{}/{}", bucket, key);
        let bytes = self.store.get(bucket, key).await?;
        decode_image(&bytes)
    }

    async fn save_png(&self, key: &str, image: &image::RgbaImage) -> Result<()> {
        let bytes = encode_png(image)?;
        let size = bytes.len();
        self.store
            .put(&self.output_bucket, key, bytes, PNG_CONTENT_TYPE)
            .await?;
        metrics::counter!("masking.bytes.written", "stage" => Stage::MaskApplication.as_str())
            .increment(size as u64);
        info!("Saved processed image to s3://{}/{}", self.output_bucket, key);
        Ok(())
    }
}

#[async_trait]
impl NotificationHandler for MaskApplicationHandler {
    fn stage(&self) -> Stage {
        Stage::MaskApplication
    }

    #[instrument(skip(self))]
    async fn handle_object(&self, bucket: &str, key: &str) -> Result<ObjectOutcome> {
        if !self.layout.is_record_key(key) {
            debug!("Skipping non-metadata object {}", key);
            return Ok(ObjectOutcome::Skipped);
        }

        let record = CorrelationRecord::from_slice(&self.store.get(bucket, key).await?)?;
        info!(
            source_bucket = %record.source_bucket,
            source_key = %record.source_key,
            "Processing correlation record"
        );

        let original = self
            .load_image(&record.source_bucket, &record.source_key)
            .await?;
        let mask = self.load_image(bucket, &record.mask_key).await?;
        let thumbnail_mask = self.load_image(bucket, &record.thumbnail_mask_key).await?;

        let processed = apply_mask(&original, &mask);
        self.save_png(&self.layout.processed_key(&record.source_key), &processed)
            .await?;

        let thumbnail = make_thumbnail(
            &original,
            record.thumbnail_dimensions(self.default_thumbnail_size),
        );
        let processed_thumbnail = apply_mask(&thumbnail, &thumbnail_mask);
        self.save_png(&self.layout.thumbnail_key(&record.source_key), &processed_thumbnail)
            .await?;

        Ok(ObjectOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::object_store::{InMemoryObjectStore, MockObjectStore};
    use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage, RgbaImage, Rgba};

    fn png(image: DynamicImage) -> Vec<u8> {
        encode_png(&image.to_rgba8()).unwrap()
    }

    fn record_for(source_key: &str, thumbnail_size: [u32; 2]) -> CorrelationRecord {
        let layout = KeyLayout::default();
        CorrelationRecord {
            source_bucket: "uploads".to_string(),
            source_key: source_key.to_string(),
            mask_key: layout.mask_key(source_key),
            thumbnail_mask_key: layout.thumbnail_mask_key(source_key),
            thumbnail_size: Some(thumbnail_size),
        }
    }

    /// Upload, both masks and the record for `source_key`, as stage 1 would leave them
    fn seed(store: &InMemoryObjectStore, source_key: &str, original: DynamicImage, mask: GrayImage) {
        let (width, height) = original.dimensions();
        let thumbnail_dims = crate::compositor::fit_within((width, height), (16, 16));
        let thumbnail_mask = image::imageops::resize(
            &mask,
            thumbnail_dims.0,
            thumbnail_dims.1,
            image::imageops::FilterType::Triangle,
        );
        let record = record_for(source_key, [16, 16]);

        store.insert("uploads", source_key, png(original), "image/png");
        store.insert("masks", &record.mask_key, png(DynamicImage::ImageLuma8(mask)), "image/png");
        store.insert(
            "masks",
            &record.thumbnail_mask_key,
            png(DynamicImage::ImageLuma8(thumbnail_mask)),
            "image/png",
        );
        store.insert(
            "masks",
            &KeyLayout::default().record_key(source_key),
            record.to_vec().unwrap(),
            "application/json",
        );
    }

    fn handler(store: Arc<InMemoryObjectStore>) -> MaskApplicationHandler {
        MaskApplicationHandler::new(store, &PipelineConfig::new("outputs", "masks"))
    }

    #[tokio::test]
    async fn test_white_mask_keeps_rgb_image_fully_opaque() {
        let store = Arc::new(InMemoryObjectStore::new());
        let original = RgbImage::from_fn(32, 24, |x, y| Rgb([x as u8 * 8, y as u8 * 10, 77]));
        seed(
            &store,
            "cat.png",
            DynamicImage::ImageRgb8(original.clone()),
            GrayImage::from_pixel(32, 24, Luma([255])),
        );

        let report = handler(store.clone())
            .handle(&S3Event::object_created([("masks", "masks/cat.png.json")]))
            .await;

        assert_eq!(report.status, "completed");
        assert_eq!(report.processed, 1);
        assert!(report.is_success());

        let processed = store.object("outputs", "processed/cat.png").unwrap();
        assert_eq!(processed.content_type, "image/png");
        let processed = decode_image(&processed.bytes).unwrap();
        assert_eq!(processed.to_rgba8(), DynamicImage::ImageRgb8(original).to_rgba8());

        let thumbnail = store.object("outputs", "thumbnails/cat.png").unwrap();
        let thumbnail = decode_image(&thumbnail.bytes).unwrap();
        assert_eq!(thumbnail.dimensions(), (16, 12));
        assert!(thumbnail.to_rgba8().pixels().all(|p| p[3] == 255));
    }

    #[tokio::test]
    async fn test_border_mask_produces_transparent_border() {
        let store = Arc::new(InMemoryObjectStore::new());
        let original = RgbaImage::from_pixel(12, 12, Rgba([200, 100, 50, 180]));
        let mask = GrayImage::from_fn(12, 12, |x, y| {
            if (3..9).contains(&x) && (3..9).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        seed(&store, "photos/dog.png", DynamicImage::ImageRgba8(original), mask);

        handler(store.clone())
            .handle(&S3Event::object_created([("masks", "masks/photos/dog.png.json")]))
            .await;

        let processed = store.object("outputs", "processed/photos/dog.png").unwrap();
        let processed = decode_image(&processed.bytes).unwrap().to_rgba8();
        for (x, y, pixel) in processed.enumerate_pixels() {
            let inside = (3..9).contains(&x) && (3..9).contains(&y);
            assert_eq!(pixel[3], if inside { 180 } else { 0 }, "pixel ({}, {})", x, y);
            assert_eq!(&pixel.0[..3], &[200, 100, 50]);
        }
    }

    #[tokio::test]
    async fn test_reprocessing_a_record_is_byte_identical() {
        let store = Arc::new(InMemoryObjectStore::new());
        let original = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 3]));
        let mask = GrayImage::from_fn(40, 30, |x, y| Luma([((x + y) * 4) as u8]));
        seed(&store, "a.jpg", DynamicImage::ImageRgb8(original), mask);

        let handler = handler(store.clone());
        let event = S3Event::object_created([("masks", "masks/a.jpg.json")]);

        handler.handle(&event).await;
        let processed = store.object("outputs", "processed/a.jpg").unwrap();
        let thumbnail = store.object("outputs", "thumbnails/a.jpg").unwrap();

        handler.handle(&event).await;
        assert_eq!(store.object("outputs", "processed/a.jpg").unwrap(), processed);
        assert_eq!(store.object("outputs", "thumbnails/a.jpg").unwrap(), thumbnail);
    }

    #[tokio::test]
    async fn test_non_record_keys_are_skipped() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        store.expect_put().never();

        let handler =
            MaskApplicationHandler::new(Arc::new(store), &PipelineConfig::new("outputs", "masks"));
        let report = handler
            .handle(&S3Event::object_created([
                ("masks", "masks/a.jpg.png"),
                ("masks", "thumbnail-masks/a.jpg.png"),
            ]))
            .await;

        assert_eq!(report.skipped, 2);
        assert_eq!(report.processed, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_missing_mask_is_not_found_and_writes_nothing() {
        let store = Arc::new(InMemoryObjectStore::new());
        let record = record_for("lost.png", [16, 16]);
        store.insert(
            "uploads",
            "lost.png",
            png(DynamicImage::ImageRgb8(RgbImage::new(4, 4))),
            "image/png",
        );
        store.insert("masks", "masks/lost.png.json", record.to_vec().unwrap(), "application/json");

        let report = handler(store.clone())
            .handle(&S3Event::object_created([("masks", "masks/lost.png.json")]))
            .await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("masks/lost.png.png"));
        assert!(!report.failures[0].retryable);
        assert!(store.object("outputs", "processed/lost.png").is_none());
    }

    #[tokio::test]
    async fn test_malformed_record_fails_only_that_notification() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("masks", "masks/bad.png.json", br#"{"source_key": "bad.png"}"#.to_vec(), "application/json");
        seed(
            &store,
            "good.png",
            DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]))),
            GrayImage::from_pixel(8, 8, Luma([128])),
        );

        let report = handler(store.clone())
            .handle(&S3Event::object_created([
                ("masks", "masks/bad.png.json"),
                ("masks", "masks/good.png.json"),
            ]))
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "masks/bad.png.json");
        assert!(report.failures[0].error.starts_with("Malformed correlation record"));
        assert!(store.object("outputs", "processed/good.png").is_some());
    }

    #[tokio::test]
    async fn test_transient_read_failure_is_retryable() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_, _| Err(PipelineError::TransientStore("connection reset".to_string())));
        store.expect_put().never();

        let handler =
            MaskApplicationHandler::new(Arc::new(store), &PipelineConfig::new("outputs", "masks"));
        let report = handler
            .handle(&S3Event::object_created([("masks", "masks/a.png.json")]))
            .await;

        assert!(report.has_retryable_failures());
    }
}
