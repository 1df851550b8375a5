use crate::config::InferenceConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sagemakerruntime::config::Builder as RuntimeConfigBuilder;
use aws_sdk_sagemakerruntime::error::DisplayErrorContext;
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::Client as RuntimeClient;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Masks produced for one source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSet {
    /// PNG-encoded full-size mask
    pub mask_png: Vec<u8>,
    /// PNG-encoded thumbnail mask
    pub thumbnail_mask_png: Vec<u8>,
    /// Thumbnail pixel dimensions, when the model reported them
    pub thumbnail_size: Option<(u32, u32)>,
}

/// Background-removal capability: given an object reference, return its masks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn generate_masks(&self, container: &str, key: &str) -> Result<MaskSet>;
}

/// Request body sent to the model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub bucket: String,
    pub key: String,
}

/// Response body returned by the model endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceResponse {
    pub mask_png: Option<String>,
    pub thumbnail_mask_png: Option<String>,
    #[serde(default)]
    pub thumbnail_size: Option<[u32; 2]>,
}

impl InferenceResponse {
    /// Parse and validate a raw response body
    pub fn parse(body: &[u8]) -> Result<MaskSet> {
        let response: InferenceResponse = serde_json::from_slice(body)
            .map_err(|e| PipelineError::Inference(format!("invalid response body: {}", e)))?;

        let mask_png = decode_field("mask_png", response.mask_png.as_deref())?;
        let thumbnail_mask_png =
            decode_field("thumbnail_mask_png", response.thumbnail_mask_png.as_deref())?;

        if matches!(response.thumbnail_size, Some(size) if size.contains(&0)) {
            return Err(PipelineError::Inference(
                "`thumbnail_size` must be non-zero".to_string(),
            ));
        }

        Ok(MaskSet {
            mask_png,
            thumbnail_mask_png,
            thumbnail_size: response.thumbnail_size.map(|[width, height]| (width, height)),
        })
    }
}

fn decode_field(name: &str, value: Option<&str>) -> Result<Vec<u8>> {
    let encoded =
        value.ok_or_else(|| PipelineError::Inference(format!("response missing `{}`", name)))?;

    STANDARD
        .decode(encoded)
        .map_err(|e| PipelineError::Inference(format!("`{}` is not valid base64: {}", name, e)))
}

/// Inference gateway backed by a SageMaker runtime endpoint
pub struct SageMakerInference {
    client: RuntimeClient,
    endpoint_name: String,
}

impl SageMakerInference {
    pub async fn new(config: &InferenceConfig) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = RuntimeConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(
            endpoint_name = %config.endpoint_name,
            endpoint_url = ?config.endpoint_url,
            "Inference gateway initialized"
        );

        Ok(Self {
            client: RuntimeClient::from_conf(builder.build()),
            endpoint_name: config.endpoint_name.clone(),
        })
    }
}

#[async_trait]
impl InferenceGateway for SageMakerInference {
    #[instrument(skip(self), fields(endpoint = %self.endpoint_name))]
    async fn generate_masks(&self, container: &str, key: &str) -> Result<MaskSet> {
        let payload = serde_json::to_vec(&InferenceRequest {
            bucket: container.to_string(),
            key: key.to_string(),
        })
        .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let response = self
            .client
            .invoke_endpoint()
            .endpoint_name(&self.endpoint_name)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(payload))
            .send()
            .await
            .map_err(|e| {
                PipelineError::Inference(format!(
                    "invoke_endpoint {} failed: {}",
                    self.endpoint_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        let body = response
            .body()
            .ok_or_else(|| PipelineError::Inference("response has no body".to_string()))?;

        debug!(size_bytes = body.as_ref().len(), "Inference response received");

        InferenceResponse::parse(body.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = serde_json::json!({
            "mask_png": STANDARD.encode([1u8, 2, 3]),
            "thumbnail_mask_png": STANDARD.encode([4u8, 5]),
            "thumbnail_size": [512, 384]
        });

        let masks = InferenceResponse::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(masks.mask_png, vec![1, 2, 3]);
        assert_eq!(masks.thumbnail_mask_png, vec![4, 5]);
        assert_eq!(masks.thumbnail_size, Some((512, 384)));
    }

    #[test]
    fn test_missing_field_is_inference_error() {
        let body = serde_json::json!({ "mask_png": STANDARD.encode([1u8]) });

        let err = InferenceResponse::parse(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(ref m) if m.contains("thumbnail_mask_png")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_base64_and_body_are_inference_errors() {
        let body = serde_json::json!({ "mask_png": "%%%", "thumbnail_mask_png": "" });
        assert!(matches!(
            InferenceResponse::parse(body.to_string().as_bytes()),
            Err(PipelineError::Inference(_))
        ));
        assert!(matches!(
            InferenceResponse::parse(b"<html>502</html>"),
            Err(PipelineError::Inference(_))
        ));
    }

    #[test]
    fn test_zero_thumbnail_size_is_inference_error() {
        for size in [[0, 0], [512, 0], [0, 384]] {
            let body = serde_json::json!({
                "mask_png": STANDARD.encode([1u8]),
                "thumbnail_mask_png": STANDARD.encode([2u8]),
                "thumbnail_size": size
            });

            let err = InferenceResponse::parse(body.to_string().as_bytes()).unwrap_err();
            assert!(matches!(err, PipelineError::Inference(ref m) if m.contains("thumbnail_size")));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_request_body_shape() {
        let request = InferenceRequest {
            bucket: "uploads".to_string(),
            key: "a+b.png".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "bucket": "uploads", "key": "a+b.png" })
        );
    }
}
