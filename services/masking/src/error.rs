use thiserror::Error;

/// Errors raised while moving an image through the masking pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A referenced object is absent: a broken correlation record or a premature trigger
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// Storage was unreachable or refused the request; redelivery may succeed
    #[error("Transient storage error: {0}")]
    TransientStore(String),

    /// Storage refused the request outright (permissions, invalid names); redelivery cannot help
    #[error("Storage request rejected: {0}")]
    StoreRejected(String),

    /// The model invocation failed or answered with an unusable payload
    #[error("Inference error: {0}")]
    Inference(String),

    /// A correlation record could not be parsed into its required fields
    #[error("Malformed correlation record: {0}")]
    MalformedRecord(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{message}")]
    Wiring {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PipelineError {
    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Whether re-delivering the same notification can be expected to succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_store_errors_are_retryable() {
        assert!(PipelineError::TransientStore("timeout".into()).is_retryable());
        assert!(!PipelineError::not_found("bucket", "key").is_retryable());
        assert!(!PipelineError::StoreRejected("AccessDenied".into()).is_retryable());
        assert!(!PipelineError::Inference("500".into()).is_retryable());
        assert!(!PipelineError::MalformedRecord("missing mask_key".into()).is_retryable());
    }

    #[test]
    fn test_not_found_names_the_object() {
        let err = PipelineError::not_found("uploads", "photos/a.jpg");
        assert_eq!(err.to_string(), "Object not found: uploads/photos/a.jpg");
    }
}
