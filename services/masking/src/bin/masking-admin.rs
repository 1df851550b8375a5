//! Operator tooling for the masking pipeline.
//!
//! `wire` connects bucket notifications to the pipeline functions on an
//! emulated AWS stack; `fetch-artifacts` stages model files for the
//! inference container.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use masking_service::artifacts::sync_model_artifacts;
use masking_service::config::StorageConfig;
use masking_service::wiring::{wire_local_events, AwsEventInfrastructure, WiringPlan};
use masking_service::S3ObjectStore;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "masking-admin", version, about = "Masking pipeline operator tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register invoke permissions and bucket notifications on a local stack
    Wire(WireArgs),
    /// Download model artifacts from object storage into a local directory
    FetchArtifacts(FetchArgs),
}

#[derive(clap::Args, Debug)]
struct WireArgs {
    /// Bucket receiving original uploads
    #[arg(long, env = "UPLOAD_BUCKET")]
    upload_bucket: String,

    /// Bucket receiving masks and correlation records
    #[arg(long, env = "MASK_BUCKET")]
    mask_bucket: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Storage emulator endpoint
    #[arg(long, env = "AWS_ENDPOINT_URL", default_value = "http://localhost:4566")]
    endpoint_url: String,

    /// Function emulator endpoint
    #[arg(long, env = "LAMBDA_ENDPOINT_URL", default_value = "http://127.0.0.1:3001")]
    lambda_endpoint: String,

    /// Only correlation records with this suffix trigger mask application
    #[arg(long, default_value = ".json")]
    metadata_suffix: String,

    #[arg(long, default_value = "TriggerSageMakerFunction")]
    request_function: String,

    #[arg(long, default_value = "ApplyMasksFunction")]
    apply_function: String,

    /// Give up resolving a function after this many seconds
    #[arg(long, default_value_t = 30)]
    resolve_timeout_secs: u64,

    #[arg(long, default_value_t = 500)]
    resolve_interval_ms: u64,
}

#[derive(clap::Args, Debug)]
struct FetchArgs {
    /// Bucket holding the model artifacts; empty skips the download
    #[arg(long, env = "MODEL_BUCKET", default_value = "")]
    bucket: String,

    #[arg(long, env = "MODEL_PREFIX", default_value = "")]
    prefix: String,

    #[arg(long, default_value = "/opt/ml/model")]
    destination: PathBuf,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Custom storage endpoint (MinIO, LocalStack)
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Wire(args) => wire(args).await,
        Command::FetchArtifacts(args) => fetch_artifacts(args).await,
    }
}

async fn wire(args: WireArgs) -> Result<()> {
    let infra =
        AwsEventInfrastructure::new(&args.region, &args.endpoint_url, &args.lambda_endpoint).await;

    let plan = WiringPlan {
        upload_bucket: args.upload_bucket,
        mask_bucket: args.mask_bucket,
        request_function: args.request_function,
        apply_function: args.apply_function,
        metadata_suffix: args.metadata_suffix,
        lambda_endpoint: args.lambda_endpoint,
        resolve_interval: Duration::from_millis(args.resolve_interval_ms),
        resolve_timeout: Duration::from_secs(args.resolve_timeout_secs),
    };

    let summary = wire_local_events(&infra, &plan)
        .await
        .context("Failed to wire local events")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn fetch_artifacts(args: FetchArgs) -> Result<()> {
    let force_path_style = args.endpoint_url.is_some();
    let store = S3ObjectStore::new(&StorageConfig {
        region: args.region,
        endpoint_url: args.endpoint_url,
        force_path_style,
    })
    .await?;

    let written = sync_model_artifacts(&store, &args.bucket, &args.prefix, &args.destination)
        .await
        .context("Failed to fetch model artifacts")?;

    info!(count = written.len(), destination = %args.destination.display(), "Model artifacts ready");
    Ok(())
}
