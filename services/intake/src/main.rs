use anyhow::{Context, Result};
use intake_service::api::{start_api_server, AppState};
use intake_service::{metadata, storage, Config, ImageNormalizer, SessionRegistry, SubmissionPipeline};
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
        storage = ?config.storage.backend,
        metadata = ?config.metadata.backend,
        "Starting Floor Survey intake service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize backends
    let blobs = storage::from_config(&config.storage)
        .await
        .context("Failed to initialize blob store")?;
    let records = metadata::from_config(&config.metadata)
        .await
        .context("Failed to initialize record sink")?;

    let normalizer = ImageNormalizer::new(config.normalizer.clone(), &config.intake.allowed_extensions);
    let pipeline = SubmissionPipeline::new(normalizer, blobs, records, config.intake.max_batch_size);

    let sessions = Arc::new(SessionRegistry::new());
    let sweeper_handle = sessions.clone().spawn_sweeper(
        config.intake.session_ttl(),
        config.intake.session_sweep_interval(),
    );

    let api_state = AppState {
        pipeline: Arc::new(pipeline),
        sessions,
        intake: Arc::new(config.intake.clone()),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Intake service started successfully");

    shutdown_signal().await;

    info!("Shutting down intake service");
    api_handle.abort();
    sweeper_handle.abort();
    info!("Intake service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
