use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Handoff artifact written by the mask request stage and consumed by the
/// mask application stage.
///
/// Immutable once written. Its own key is derived from `source_key` so the
/// second stage needs no index to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    /// Bucket the original upload lives in
    pub source_bucket: String,
    /// Decoded key of the original upload
    pub source_key: String,
    /// Full-size mask key in the mask bucket
    pub mask_key: String,
    /// Thumbnail mask key in the mask bucket
    pub thumbnail_mask_key: String,
    /// Thumbnail bounds as `[width, height]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_size: Option<[u32; 2]>,
}

impl CorrelationRecord {
    /// Parse persisted record bytes, requiring every key field to be present and non-empty
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let record: Self = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedRecord(e.to_string()))?;

        for (field, value) in [
            ("source_bucket", &record.source_bucket),
            ("source_key", &record.source_key),
            ("mask_key", &record.mask_key),
            ("thumbnail_mask_key", &record.thumbnail_mask_key),
        ] {
            if value.is_empty() {
                return Err(PipelineError::MalformedRecord(format!(
                    "field `{}` is empty",
                    field
                )));
            }
        }

        if matches!(record.thumbnail_size, Some(size) if size.contains(&0)) {
            return Err(PipelineError::MalformedRecord(
                "thumbnail_size must be non-zero".to_string(),
            ));
        }

        Ok(record)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PipelineError::MalformedRecord(e.to_string()))
    }

    /// Thumbnail bounds as (width, height), falling back to `default` when absent
    pub fn thumbnail_dimensions(&self, default: (u32, u32)) -> (u32, u32) {
        self.thumbnail_size
            .map(|[width, height]| (width, height))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let json = br#"{
            "source_bucket": "uploads",
            "source_key": "photos/a.jpg",
            "mask_key": "masks/photos/a.jpg.png",
            "thumbnail_mask_key": "thumbnail-masks/photos/a.jpg.png",
            "thumbnail_size": [512, 384]
        }"#;

        let record = CorrelationRecord::from_slice(json).unwrap();
        assert_eq!(record.source_bucket, "uploads");
        assert_eq!(record.source_key, "photos/a.jpg");
        assert_eq!(record.thumbnail_dimensions((512, 512)), (512, 384));
    }

    #[test]
    fn test_missing_thumbnail_size_uses_default() {
        let json = br#"{
            "source_bucket": "uploads",
            "source_key": "a.jpg",
            "mask_key": "masks/a.jpg.png",
            "thumbnail_mask_key": "thumbnail-masks/a.jpg.png"
        }"#;

        let record = CorrelationRecord::from_slice(json).unwrap();
        assert_eq!(record.thumbnail_dimensions((256, 128)), (256, 128));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let json = br#"{
            "source_bucket": "uploads",
            "source_key": "a.jpg",
            "thumbnail_mask_key": "thumbnail-masks/a.jpg.png"
        }"#;

        let err = CorrelationRecord::from_slice(json).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord(ref m) if m.contains("mask_key")));
    }

    #[test]
    fn test_empty_field_and_garbage_are_malformed() {
        let json = br#"{
            "source_bucket": "",
            "source_key": "a.jpg",
            "mask_key": "masks/a.jpg.png",
            "thumbnail_mask_key": "thumbnail-masks/a.jpg.png"
        }"#;
        assert!(matches!(
            CorrelationRecord::from_slice(json),
            Err(PipelineError::MalformedRecord(_))
        ));
        assert!(matches!(
            CorrelationRecord::from_slice(b"{not json"),
            Err(PipelineError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_serialized_field_names() {
        let record = CorrelationRecord {
            source_bucket: "uploads".to_string(),
            source_key: "a.jpg".to_string(),
            mask_key: "masks/a.jpg.png".to_string(),
            thumbnail_mask_key: "thumbnail-masks/a.jpg.png".to_string(),
            thumbnail_size: Some([512, 512]),
        };

        let value: serde_json::Value = serde_json::from_slice(&record.to_vec().unwrap()).unwrap();
        assert_eq!(value["source_bucket"], "uploads");
        assert_eq!(value["thumbnail_mask_key"], "thumbnail-masks/a.jpg.png");
        assert_eq!(value["thumbnail_size"], serde_json::json!([512, 512]));
    }
}
