use anyhow::{Context, Result};
use masking_service::api::{start_api_server, AppState};
use masking_service::kafka_consumer::NotificationKafkaConsumer;
use masking_service::{
    Config, MaskApplicationHandler, MaskRequestHandler, ObjectStore, S3ObjectStore,
    SageMakerInference,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        output_bucket = %config.pipeline.output_bucket,
        mask_bucket = %config.pipeline.mask_bucket,
        "Starting masking service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::new(&config.storage)
            .await
            .context("Failed to initialize object store")?,
    );

    let inference = Arc::new(
        SageMakerInference::new(&config.inference)
            .await
            .context("Failed to initialize inference gateway")?,
    );

    let mask_request = Arc::new(MaskRequestHandler::new(
        store.clone(),
        inference,
        &config.pipeline,
    ));
    let mask_application = Arc::new(MaskApplicationHandler::new(store, &config.pipeline));

    // Spawn Kafka consumer task when configured
    let consumer_handle = match config.kafka {
        Some(ref kafka_config) => {
            let consumer = NotificationKafkaConsumer::new(
                kafka_config,
                mask_request.clone(),
                mask_application.clone(),
            )
            .context("Failed to initialize Kafka consumer")?;

            Some(tokio::spawn(async move {
                if let Err(e) = consumer.run().await {
                    error!(error = %e, "Kafka consumer error");
                }
            }))
        }
        None => None,
    };

    // Spawn webhook server task
    let api_state = AppState {
        mask_request,
        mask_application,
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Masking service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down masking service");

    if let Some(handle) = consumer_handle {
        handle.abort();
    }
    api_handle.abort();

    info!("Masking service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
