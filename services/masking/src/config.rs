use crate::error::PipelineError;
use serde::Deserialize;

/// Main configuration for the masking service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Webhook API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Inference endpoint configuration
    pub inference: InferenceConfig,
    /// Key layout and bucket names shared by both stages
    pub pipeline: PipelineConfig,
    /// Kafka notification transport (disabled when absent)
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// API configuration for the notification webhooks
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// S3-compatible storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Inference endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Name of the deployed model endpoint
    pub endpoint_name: String,
    /// Custom runtime endpoint URL (for local emulation)
    pub endpoint_url: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
}

/// Bucket names and the key layout both stages derive their keys from
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bucket receiving the processed and thumbnail outputs
    pub output_bucket: String,
    /// Bucket receiving masks and correlation records
    pub mask_bucket: String,
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,
    #[serde(default = "default_thumbnail_prefix")]
    pub thumbnail_prefix: String,
    /// Appended to processed and thumbnail output keys (empty keeps the source key as is)
    #[serde(default)]
    pub output_suffix: String,
    #[serde(default = "default_mask_prefix")]
    pub mask_prefix: String,
    #[serde(default = "default_thumbnail_mask_prefix")]
    pub thumbnail_mask_prefix: String,
    /// Suffix of correlation record keys; stage 2 only reacts to these
    #[serde(default = "default_metadata_suffix")]
    pub metadata_suffix: String,
    #[serde(default = "default_mask_image_suffix")]
    pub mask_image_suffix: String,
    /// Thumbnail bounds used when a response or record omits them
    #[serde(default = "default_thumbnail_size")]
    pub default_thumbnail_size: [u32; 2],
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying upload bucket notifications
    #[serde(default = "default_upload_topic")]
    pub upload_topic: String,
    /// Topic carrying mask bucket notifications
    #[serde(default = "default_mask_topic")]
    pub mask_topic: String,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

// Default value functions
fn default_service_name() -> String {
    "masking-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_processed_prefix() -> String {
    "processed/".to_string()
}

fn default_thumbnail_prefix() -> String {
    "thumbnails/".to_string()
}

fn default_mask_prefix() -> String {
    "masks/".to_string()
}

fn default_thumbnail_mask_prefix() -> String {
    "thumbnail-masks/".to_string()
}

fn default_metadata_suffix() -> String {
    ".json".to_string()
}

fn default_mask_image_suffix() -> String {
    ".png".to_string()
}

fn default_thumbnail_size() -> [u32; 2] {
    [512, 512]
}

fn default_consumer_group() -> String {
    "masking-service".to_string()
}

fn default_upload_topic() -> String {
    "masking.uploads".to_string()
}

fn default_mask_topic() -> String {
    "masking.masks".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/masking").required(false))
            .add_source(config::File::with_name("/etc/masking/masking").required(false))
            // MASKING__PIPELINE__OUTPUT_BUCKET -> pipeline.output_bucket
            .add_source(
                config::Environment::with_prefix("MASKING")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pipeline.default_thumbnail_size")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the two stages disagree on key layout
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pipeline.validate()?;

        if self.inference.endpoint_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "inference.endpoint_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl PipelineConfig {
    /// Build a layout with default prefixes and suffixes for the given buckets
    pub fn new(output_bucket: impl Into<String>, mask_bucket: impl Into<String>) -> Self {
        Self {
            output_bucket: output_bucket.into(),
            mask_bucket: mask_bucket.into(),
            processed_prefix: default_processed_prefix(),
            thumbnail_prefix: default_thumbnail_prefix(),
            output_suffix: String::new(),
            mask_prefix: default_mask_prefix(),
            thumbnail_mask_prefix: default_thumbnail_mask_prefix(),
            metadata_suffix: default_metadata_suffix(),
            mask_image_suffix: default_mask_image_suffix(),
            default_thumbnail_size: default_thumbnail_size(),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output_bucket.trim().is_empty() {
            return Err(PipelineError::Config(
                "pipeline.output_bucket must not be empty".to_string(),
            ));
        }
        if self.mask_bucket.trim().is_empty() {
            return Err(PipelineError::Config(
                "pipeline.mask_bucket must not be empty".to_string(),
            ));
        }
        if self.metadata_suffix.is_empty() || self.mask_image_suffix.is_empty() {
            return Err(PipelineError::Config(
                "metadata and mask image suffixes must not be empty".to_string(),
            ));
        }
        // Masks and records share the mask prefix, so their suffixes must differ
        if self.metadata_suffix == self.mask_image_suffix {
            return Err(PipelineError::Config(format!(
                "metadata suffix {:?} collides with the mask image suffix",
                self.metadata_suffix
            )));
        }
        if self.default_thumbnail_size.contains(&0) {
            return Err(PipelineError::Config(
                "pipeline.default_thumbnail_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Default thumbnail bounds as (width, height)
    pub fn default_thumbnail_dimensions(&self) -> (u32, u32) {
        (self.default_thumbnail_size[0], self.default_thumbnail_size[1])
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}
