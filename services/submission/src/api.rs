use crate::config::{ApiConfig, ConfigurationError};
use crate::pipeline::SubmissionPipeline;
use crate::response::ResponseAssembler;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The pipeline, or the reason it could not be built
    pipeline: Result<Arc<SubmissionPipeline>, Arc<ConfigurationError>>,
    responses: Arc<ResponseAssembler>,
}

impl AppState {
    pub fn new(pipeline: SubmissionPipeline, responses: ResponseAssembler) -> Self {
        Self {
            pipeline: Ok(Arc::new(pipeline)),
            responses: Arc::new(responses),
        }
    }

    /// State for a process whose repository settings are unusable.
    ///
    /// Submissions are answered with a configuration error instead of the
    /// process refusing to start.
    pub fn misconfigured(error: ConfigurationError, responses: ResponseAssembler) -> Self {
        Self {
            pipeline: Err(Arc::new(error)),
            responses: Arc::new(responses),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/submit-form", any(submit_form))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "submission-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = match &state.pipeline {
        Ok(pipeline) => pipeline,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "repository": "unconfigured",
                    "error": e.to_string()
                })),
            )
        }
    };

    match pipeline.repository().get_repo().await {
        Ok(info) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "repository": info.full_name,
                "default_branch": info.default_branch
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Repository readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "repository": "unreachable",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// The submission endpoint. Accepts any method so that the CORS headers
/// are present on preflights and rejections too.
async fn submit_form(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let responses = &state.responses;

    if method == Method::OPTIONS {
        record_outcome("preflight");
        return responses.preflight(&headers);
    }
    if method != Method::POST {
        record_outcome("method_not_allowed");
        return responses.method_not_allowed(&headers);
    }

    let pipeline = match &state.pipeline {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Submission refused: service is misconfigured");
            record_outcome("configuration_error");
            return responses.configuration_error(&headers, e);
        }
    };

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(status = %rejection.status(), "Request body could not be read");
            record_outcome("unreadable_body");
            return responses.unreadable_body(&headers, rejection.status(), rejection.body_text());
        }
    };

    match pipeline.process(&body).await {
        Ok(outcome) => {
            record_outcome("success");
            responses.success(&headers, &outcome)
        }
        Err(e) => {
            if e.status().is_server_error() {
                error!(error = %e, "Submission failed");
                record_outcome("upload_failed");
            } else {
                record_outcome("rejected");
            }
            responses.failure(&headers, &e)
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("submission.requests", "outcome" => outcome).increment(1);
}

/// Start the API server, stopping gracefully when `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting submission API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
