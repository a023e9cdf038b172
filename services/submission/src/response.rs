//! Caller-facing responses for the submission endpoint.
//!
//! Every response built here, including errors and preflights, carries the
//! same CORS header set for the request's origin.

use crate::config::{ApiConfig, ConfigurationError};
use crate::pipeline::{PipelineError, SubmissionOutcome};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";

/// Success body: `{message, filename, imageUrl, sha?}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessBody {
    pub message: String,
    pub filename: String,
    /// Always serialized; `null` when no image was uploaded
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// Error body: `{message, error?, details?}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Allowed origins for the submission endpoint.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<HeaderValue>,
}

impl CorsPolicy {
    /// Allow any origin.
    pub fn wildcard() -> Self {
        Self {
            origins: Vec::new(),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ConfigurationError> {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|e| ConfigurationError::InvalidValue {
                    field: "api.cors_origins".to_string(),
                    message: format!("{o}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // An explicit "*" entry means wildcard
        if origins.iter().any(|o| o == "*") {
            return Ok(Self::wildcard());
        }
        Ok(Self { origins })
    }

    /// `Access-Control-Allow-Origin` value for a request carrying `origin`.
    pub fn allow_origin(&self, origin: Option<&HeaderValue>) -> HeaderValue {
        match self.origins.as_slice() {
            [] => HeaderValue::from_static("*"),
            [only] => only.clone(),
            [first, ..] => origin
                .filter(|o| self.origins.contains(o))
                .unwrap_or(first)
                .clone(),
        }
    }

    /// The full CORS header set for a request.
    pub fn headers(&self, request_headers: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            self.allow_origin(request_headers.get(axum::http::header::ORIGIN)),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers
    }
}

/// Builds responses; technical details are only exposed in debug mode.
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    cors: CorsPolicy,
    debug: bool,
}

impl ResponseAssembler {
    pub fn new(cors: CorsPolicy, debug: bool) -> Self {
        Self { cors, debug }
    }

    /// Preflight: CORS headers and an empty body.
    pub fn preflight(&self, request_headers: &HeaderMap) -> Response {
        (StatusCode::OK, self.cors.headers(request_headers)).into_response()
    }

    pub fn success(&self, request_headers: &HeaderMap, outcome: &SubmissionOutcome) -> Response {
        let body = SuccessBody {
            message: "success".to_string(),
            filename: outcome.record_path.clone(),
            image_url: outcome.image_path.clone(),
            sha: Some(outcome.sha.clone()),
        };
        (StatusCode::OK, self.cors.headers(request_headers), Json(body)).into_response()
    }

    pub fn failure(&self, request_headers: &HeaderMap, error: &PipelineError) -> Response {
        let body = match error {
            PipelineError::Validation(e) => ErrorBody {
                message: e.to_string(),
                error: Some(e.code().to_string()),
                details: None,
            },
            PipelineError::Upload(e) => ErrorBody {
                message: "Submission failed".to_string(),
                error: Some("upload_failed".to_string()),
                details: self.debug.then(|| e.to_string()),
            },
            PipelineError::Internal(e) => ErrorBody {
                message: "Submission failed".to_string(),
                error: Some("internal_error".to_string()),
                details: self.debug.then(|| e.clone()),
            },
        };
        self.json(request_headers, error.status(), body)
    }

    /// Configuration problems are reported before the body is looked at.
    pub fn configuration_error(
        &self,
        request_headers: &HeaderMap,
        error: &ConfigurationError,
    ) -> Response {
        let body = ErrorBody {
            message: "Server configuration error".to_string(),
            error: Some("configuration_error".to_string()),
            details: self.debug.then(|| error.to_string()),
        };
        self.json(request_headers, StatusCode::INTERNAL_SERVER_ERROR, body)
    }

    pub fn method_not_allowed(&self, request_headers: &HeaderMap) -> Response {
        let body = ErrorBody {
            message: "method not allowed".to_string(),
            error: None,
            details: None,
        };
        self.json(request_headers, StatusCode::METHOD_NOT_ALLOWED, body)
    }

    /// The request body could not be read (too large, aborted, ...).
    pub fn unreadable_body(
        &self,
        request_headers: &HeaderMap,
        status: StatusCode,
        reason: String,
    ) -> Response {
        let body = ErrorBody {
            message: "Request body could not be read".to_string(),
            error: Some("unreadable_body".to_string()),
            details: self.debug.then_some(reason),
        };
        self.json(request_headers, status, body)
    }

    fn json(&self, request_headers: &HeaderMap, status: StatusCode, body: ErrorBody) -> Response {
        (status, self.cors.headers(request_headers), Json(body)).into_response()
    }
}
