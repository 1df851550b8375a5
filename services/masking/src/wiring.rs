//! Local event wiring for emulated infrastructure.
//!
//! Registers invoke permissions and bucket notifications so that uploads
//! reach the mask request function and correlation records reach the mask
//! application function. Development only; never on the production path.

use crate::error::PipelineError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::types::{
    Event, FilterRule, FilterRuleName, LambdaFunctionConfiguration, NotificationConfiguration,
    NotificationConfigurationFilter, S3KeyFilter,
};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Failures reported by the emulated function/storage control plane
#[derive(Error, Debug)]
pub enum InfraError {
    /// The permission or subscription is already registered
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Service(String),
}

/// Control-plane operations the wiring needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventInfrastructure: Send + Sync {
    /// Resolve a function name to its ARN
    async fn lookup_function(&self, name: &str) -> Result<String, InfraError>;

    /// Allow the storage service to invoke `function_name` for events from `source_arn`
    async fn grant_invoke(
        &self,
        function_name: &str,
        statement_id: &str,
        source_arn: &str,
    ) -> Result<(), InfraError>;

    /// Replace the bucket's notification configuration with a single function target
    async fn subscribe(
        &self,
        bucket: &str,
        function_arn: &str,
        events: Vec<String>,
        suffix: Option<String>,
    ) -> Result<(), InfraError>;
}

/// Repeat `lookup` every `interval` until it succeeds or `timeout` elapses.
///
/// On timeout the returned error carries the last lookup failure as its source.
pub async fn poll_until_ready<T, E, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut lookup: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match lookup().await {
            Ok(value) => {
                debug!(what, attempts, "Resolved");
                return Ok(value);
            }
            Err(e) => e.into(),
        };

        if Instant::now() >= deadline {
            return Err(PipelineError::Wiring {
                message: format!(
                    "timed out after {:?} and {} attempts waiting for {}",
                    timeout, attempts, what
                ),
                source: Some(last_error),
            });
        }

        debug!(what, attempts, error = %last_error, "Not ready yet");
        tokio::time::sleep(interval).await;
    }
}

/// Names and addresses the wiring operates on
#[derive(Debug, Clone)]
pub struct WiringPlan {
    pub upload_bucket: String,
    pub mask_bucket: String,
    pub request_function: String,
    pub apply_function: String,
    pub metadata_suffix: String,
    /// Function emulator address, quoted in resolution errors
    pub lambda_endpoint: String,
    pub resolve_interval: Duration,
    pub resolve_timeout: Duration,
}

/// Printed once wiring completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WiringSummary {
    pub upload_bucket: String,
    pub mask_bucket: String,
    pub functions: Vec<String>,
}

const OBJECT_CREATED: &str = "s3:ObjectCreated:*";

/// Register permissions and notifications for both pipeline stages
#[instrument(skip(infra, plan), fields(upload_bucket = %plan.upload_bucket, mask_bucket = %plan.mask_bucket))]
pub async fn wire_local_events(
    infra: &dyn EventInfrastructure,
    plan: &WiringPlan,
) -> Result<WiringSummary, PipelineError> {
    let request_arn = resolve_function(infra, plan, &plan.request_function).await?;
    let apply_arn = resolve_function(infra, plan, &plan.apply_function).await?;

    ensure_permission(infra, &plan.request_function, &bucket_arn(&plan.upload_bucket)).await?;
    ensure_permission(infra, &plan.apply_function, &bucket_arn(&plan.mask_bucket)).await?;

    infra
        .subscribe(
            &plan.upload_bucket,
            &request_arn,
            vec![OBJECT_CREATED.to_string()],
            None,
        )
        .await
        .map_err(|e| wiring_error(format!("subscribing {}", plan.upload_bucket), e))?;

    infra
        .subscribe(
            &plan.mask_bucket,
            &apply_arn,
            vec![OBJECT_CREATED.to_string()],
            Some(plan.metadata_suffix.clone()),
        )
        .await
        .map_err(|e| wiring_error(format!("subscribing {}", plan.mask_bucket), e))?;

    info!("Bucket notifications configured");

    Ok(WiringSummary {
        upload_bucket: plan.upload_bucket.clone(),
        mask_bucket: plan.mask_bucket.clone(),
        functions: vec![plan.request_function.clone(), plan.apply_function.clone()],
    })
}

async fn resolve_function(
    infra: &dyn EventInfrastructure,
    plan: &WiringPlan,
    name: &str,
) -> Result<String, PipelineError> {
    poll_until_ready(
        &format!("function {}", name),
        plan.resolve_interval,
        plan.resolve_timeout,
        move || infra.lookup_function(name),
    )
    .await
    .map_err(|e| match e {
        PipelineError::Wiring { message, source } => PipelineError::Wiring {
            message: format!(
                "{} at {}; if this tool runs in a different container than the function \
                 emulator, pass a container-reachable --lambda-endpoint \
                 (e.g. http://host.docker.internal:3001)",
                message, plan.lambda_endpoint
            ),
            source,
        },
        other => other,
    })
}

/// Grant invoke permission; an identical grant that already exists is fine
async fn ensure_permission(
    infra: &dyn EventInfrastructure,
    function_name: &str,
    source_arn: &str,
) -> Result<(), PipelineError> {
    let statement_id = format!("AllowExecutionFrom{}", function_name);

    match infra.grant_invoke(function_name, &statement_id, source_arn).await {
        Ok(()) => {
            info!(function = function_name, source_arn, "Invoke permission granted");
            Ok(())
        }
        Err(InfraError::AlreadyExists(detail)) => {
            debug!(function = function_name, %detail, "Invoke permission already present");
            Ok(())
        }
        Err(e) => Err(wiring_error(format!("granting invoke on {}", function_name), e)),
    }
}

fn wiring_error(action: String, source: InfraError) -> PipelineError {
    PipelineError::Wiring {
        message: format!("failed {}", action),
        source: Some(Box::new(source)),
    }
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{}", bucket)
}

/// Function and storage control planes of an emulated AWS environment
pub struct AwsEventInfrastructure {
    lambda: aws_sdk_lambda::Client,
    s3: aws_sdk_s3::Client,
}

impl AwsEventInfrastructure {
    pub async fn new(region: &str, storage_endpoint: &str, lambda_endpoint: &str) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(storage_endpoint)
            .force_path_style(true)
            .build();
        let lambda_config = aws_sdk_lambda::config::Builder::from(&aws_config)
            .endpoint_url(lambda_endpoint)
            .build();

        Self {
            lambda: aws_sdk_lambda::Client::from_conf(lambda_config),
            s3: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl EventInfrastructure for AwsEventInfrastructure {
    async fn lookup_function(&self, name: &str) -> Result<String, InfraError> {
        let output = self
            .lambda
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| {
                InfraError::Service(aws_sdk_lambda::error::DisplayErrorContext(&e).to_string())
            })?;

        output
            .configuration()
            .and_then(|c| c.function_arn())
            .map(String::from)
            .ok_or_else(|| InfraError::Service(format!("function {} has no ARN yet", name)))
    }

    async fn grant_invoke(
        &self,
        function_name: &str,
        statement_id: &str,
        source_arn: &str,
    ) -> Result<(), InfraError> {
        match self
            .lambda
            .add_permission()
            .function_name(function_name)
            .statement_id(statement_id)
            .action("lambda:InvokeFunction")
            .principal("s3.amazonaws.com")
            .source_arn(source_arn)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_resource_conflict_exception())
                    .unwrap_or(false)
                {
                    Err(InfraError::AlreadyExists(statement_id.to_string()))
                } else {
                    Err(InfraError::Service(
                        aws_sdk_lambda::error::DisplayErrorContext(&e).to_string(),
                    ))
                }
            }
        }
    }

    async fn subscribe(
        &self,
        bucket: &str,
        function_arn: &str,
        events: Vec<String>,
        suffix: Option<String>,
    ) -> Result<(), InfraError> {
        let mut target = LambdaFunctionConfiguration::builder()
            .lambda_function_arn(function_arn)
            .set_events(Some(events.iter().map(|e| Event::from(e.as_str())).collect()));

        if let Some(suffix) = suffix {
            target = target.filter(
                NotificationConfigurationFilter::builder()
                    .key(
                        S3KeyFilter::builder()
                            .filter_rules(
                                FilterRule::builder()
                                    .name(FilterRuleName::Suffix)
                                    .value(suffix)
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            );
        }

        let target = target
            .build()
            .map_err(|e| InfraError::Service(e.to_string()))?;

        self.s3
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(
                NotificationConfiguration::builder()
                    .lambda_function_configurations(target)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                warn!(bucket, "Notification configuration rejected");
                InfraError::Service(aws_sdk_s3::error::DisplayErrorContext(&e).to_string())
            })?;

        Ok(())
    }
}
