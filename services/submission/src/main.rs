use anyhow::{Context, Result};
use std::sync::Arc;
use submission_service::{
    start_api_server, AppState, Config, CorsPolicy, GitHubContentClient, ResponseAssembler,
    RetryPolicy, SubmissionPipeline,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting submission service"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    let cors = CorsPolicy::from_config(&config.api).context("Invalid CORS origins")?;
    let responses = ResponseAssembler::new(cors, config.service.debug);

    info!(
        token = %config.repository.token_fingerprint(),
        owner = config.repository.owner.as_deref().unwrap_or("<unset>"),
        repo = config.repository.name.as_deref().unwrap_or("<unset>"),
        branch = %config.repository.branch,
        "Content repository settings"
    );

    // A missing token or repository keeps the process up; submissions get a 500
    let state = match GitHubContentClient::new(&config.repository) {
        Ok(client) => {
            let pipeline = SubmissionPipeline::new(
                Arc::new(client),
                RetryPolicy::from_config(&config),
                config.repository.branch.clone(),
            );
            AppState::new(pipeline, responses)
        }
        Err(e) => {
            warn!(error = %e, "Content repository is not configured, submissions will be refused");
            AppState::misconfigured(e, responses)
        }
    };

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Submission service stopped");

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

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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

    info!("Shutting down submission service");
}
