//! Object storage notifications and per-record batch dispatch.

use crate::error::Result;
use crate::keys::decode_notification_key;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// S3-style event notification document: `{"Records": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// URL-escaped object key
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl S3Event {
    /// Build an "object created" notification for the given (bucket, raw key) pairs
    pub fn object_created<'a>(objects: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            records: objects
                .into_iter()
                .map(|(bucket, key)| S3EventRecord {
                    event_name: Some("ObjectCreated:Put".to_string()),
                    s3: S3Entity {
                        bucket: S3Bucket {
                            name: bucket.to_string(),
                        },
                        object: S3Object {
                            key: key.to_string(),
                            size: None,
                        },
                    },
                })
                .collect(),
        }
    }
}

/// Which side of the handoff a handler implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MaskRequest,
    MaskApplication,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MaskRequest => "mask_request",
            Stage::MaskApplication => "mask_application",
        }
    }

    /// Informational status returned once a batch has been handled
    pub fn completion_status(&self) -> &'static str {
        match self {
            Stage::MaskRequest => "submitted",
            Stage::MaskApplication => "completed",
        }
    }
}

/// Result of handling one notified object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Processed,
    /// Delivered but not meant for this handler
    Skipped,
}

/// Handler trait for objects named by a notification
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// Handle one object; `key` is already percent-decoded
    async fn handle_object(&self, bucket: &str, key: &str) -> Result<ObjectOutcome>;
}

/// One notification that could not be handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub bucket: String,
    pub key: String,
    pub error: String,
    pub retryable: bool,
}

/// Per-batch summary; failures are reported per notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: String,
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    fn new(stage: Stage) -> Self {
        Self {
            status: stage.completion_status().to_string(),
            processed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn has_retryable_failures(&self) -> bool {
        self.failures.iter().any(|f| f.retryable)
    }

    /// Whether the sender should deliver this batch again
    pub fn disposition(&self) -> Disposition {
        if self.has_retryable_failures() {
            Disposition::Redeliver
        } else {
            Disposition::Acknowledge
        }
    }
}

/// What a transport tells the sender once a batch has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Everything succeeded or failed permanently
    Acknowledge,
    /// A retryable failure occurred: hand the batch over again
    Redeliver,
}

/// Run every record of a notification batch through `handler`, sequentially.
///
/// A failing record is logged and reported; it never stops the records after it.
#[instrument(skip(handler, event), fields(stage = handler.stage().as_str(), records = event.records.len()))]
pub async fn dispatch<H>(handler: &H, event: &S3Event) -> BatchReport
where
    H: NotificationHandler + ?Sized,
{
    let stage = handler.stage();
    let mut report = BatchReport::new(stage);

    for record in &event.records {
        let bucket = record.s3.bucket.name.as_str();
        let key = decode_notification_key(&record.s3.object.key);
        let started = Instant::now();

        match handler.handle_object(bucket, &key).await {
            Ok(ObjectOutcome::Processed) => {
                report.processed += 1;
                metrics::counter!("masking.records.processed", "stage" => stage.as_str())
                    .increment(1);
                metrics::histogram!("masking.record.duration_seconds", "stage" => stage.as_str())
                    .record(started.elapsed().as_secs_f64());
            }
            Ok(ObjectOutcome::Skipped) => {
                report.skipped += 1;
                debug!(bucket = %bucket, key = %key, "Skipped notification");
                metrics::counter!("masking.records.skipped", "stage" => stage.as_str())
                    .increment(1);
            }
            Err(e) => {
                error!(
                    bucket = %bucket,
                    key = %key,
                    retryable = e.is_retryable(),
                    error = ?e,
                    "Failed to handle notification"
                );
                metrics::counter!("masking.records.failed", "stage" => stage.as_str())
                    .increment(1);
                report.failures.push(RecordFailure {
                    bucket: bucket.to_string(),
                    key,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }
    }

    info!(
        status = %report.status,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failures.len(),
        "Notification batch handled"
    );

    report
}
