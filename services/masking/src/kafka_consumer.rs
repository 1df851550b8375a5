use crate::config::KafkaConfig;
use crate::events::{Disposition, S3Event};
use crate::mask_apply::MaskApplicationHandler;
use crate::mask_request::MaskRequestHandler;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const REDELIVERY_DELAY: Duration = Duration::from_secs(1);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka consumer for bucket notifications published by the object store
pub struct NotificationKafkaConsumer {
    consumer: StreamConsumer,
    upload_topic: String,
    mask_topic: String,
    mask_request: Arc<MaskRequestHandler>,
    mask_application: Arc<MaskApplicationHandler>,
}

impl NotificationKafkaConsumer {
    /// Create a new Kafka consumer for both notification topics
    pub fn new(
        config: &KafkaConfig,
        mask_request: Arc<MaskRequestHandler>,
        mask_application: Arc<MaskApplicationHandler>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[config.upload_topic.as_str(), config.mask_topic.as_str()])
            .context("Failed to subscribe to notification topics")?;

        info!(
            upload_topic = %config.upload_topic,
            mask_topic = %config.mask_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topics"
        );

        Ok(Self {
            consumer,
            upload_topic: config.upload_topic.clone(),
            mask_topic: config.mask_topic.clone(),
            mask_request,
            mask_application,
        })
    }

    /// Start consuming and processing messages
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting notification Kafka consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => match self.process_message(&message).await {
                    Ok(Disposition::Acknowledge) => {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                    }
                    Ok(Disposition::Redeliver) => {
                        warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Rewinding for redelivery"
                        );
                        tokio::time::sleep(REDELIVERY_DELAY).await;
                        if let Err(e) = self.consumer.seek(
                            message.topic(),
                            message.partition(),
                            Offset::Offset(message.offset()),
                            SEEK_TIMEOUT,
                        ) {
                            error!(error = %e, "Failed to rewind partition");
                        }
                    }
                    Err(e) => {
                        // Undecodable payloads never become decodable: commit past them
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message"
                        );
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                    }
                },
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("masking.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process a single Kafka message
    #[instrument(skip(self, message), fields(topic = message.topic(), partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<Disposition> {
        let payload = message.payload().context("Message has no payload")?;

        let event: S3Event = serde_json::from_slice(payload)
            .context("Failed to deserialize bucket notification")?;

        debug!(records = event.records.len(), "Received bucket notification");

        let report = if message.topic() == self.upload_topic {
            self.mask_request.handle(&event).await
        } else if message.topic() == self.mask_topic {
            self.mask_application.handle(&event).await
        } else {
            warn!(topic = message.topic(), "Message from unexpected topic");
            return Ok(Disposition::Acknowledge);
        };

        Ok(report.disposition())
    }
}
