//! Key derivation shared by both pipeline stages.
//!
//! Stage 2 finds the work of stage 1 purely by naming convention: every key
//! either stage reads or writes is derived here from the source object key.

use crate::config::PipelineConfig;
use percent_encoding::percent_decode_str;

/// Decode an object key as delivered in a storage notification.
///
/// Notification keys are form-URL-escaped: `+` stands for a space and
/// reserved characters are percent-encoded. Invalid UTF-8 sequences are
/// replaced rather than rejected.
pub fn decode_notification_key(raw: &str) -> String {
    let unplussed = raw.replace('+', " ");
    percent_decode_str(&unplussed)
        .decode_utf8_lossy()
        .into_owned()
}

/// Remove `.` and `..` path segments and leading separators from a source key.
///
/// Only whole segments are dropped, so `report..v2.png` keeps its name and
/// never collides with `reportv2.png`.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
        .trim_start_matches('/')
        .to_string()
}

/// `prefix + sanitize(source_key) + suffix`
pub fn derive_key(prefix: &str, source_key: &str, suffix: &str) -> String {
    format!("{}{}{}", prefix, sanitize_key(source_key), suffix)
}

/// Prefixes and suffixes that map a source key to every derived key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub processed_prefix: String,
    pub thumbnail_prefix: String,
    pub output_suffix: String,
    pub mask_prefix: String,
    pub thumbnail_mask_prefix: String,
    pub metadata_suffix: String,
    pub mask_image_suffix: String,
}

impl KeyLayout {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            processed_prefix: config.processed_prefix.clone(),
            thumbnail_prefix: config.thumbnail_prefix.clone(),
            output_suffix: config.output_suffix.clone(),
            mask_prefix: config.mask_prefix.clone(),
            thumbnail_mask_prefix: config.thumbnail_mask_prefix.clone(),
            metadata_suffix: config.metadata_suffix.clone(),
            mask_image_suffix: config.mask_image_suffix.clone(),
        }
    }

    /// Full-size mask: `masks/<key>.png`
    pub fn mask_key(&self, source_key: &str) -> String {
        derive_key(&self.mask_prefix, source_key, &self.mask_image_suffix)
    }

    /// Thumbnail mask: `thumbnail-masks/<key>.png`
    pub fn thumbnail_mask_key(&self, source_key: &str) -> String {
        derive_key(&self.thumbnail_mask_prefix, source_key, &self.mask_image_suffix)
    }

    /// Correlation record: `masks/<key>.json`
    pub fn record_key(&self, source_key: &str) -> String {
        derive_key(&self.mask_prefix, source_key, &self.metadata_suffix)
    }

    /// Full-size composited output: `processed/<key>`
    pub fn processed_key(&self, source_key: &str) -> String {
        derive_key(&self.processed_prefix, source_key, &self.output_suffix)
    }

    /// Thumbnail composited output: `thumbnails/<key>`
    pub fn thumbnail_key(&self, source_key: &str) -> String {
        derive_key(&self.thumbnail_prefix, source_key, &self.output_suffix)
    }

    /// Whether a mask bucket key names a correlation record
    pub fn is_record_key(&self, key: &str) -> bool {
        key.ends_with(&self.metadata_suffix)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::new("", ""))
    }
}
