//! Per-request submission pipeline.
//!
//! ```text
//! Validating ──▶ Normalizing ──▶ UploadingImage ──▶ UploadingRecord ──▶ Done
//!      │              │       └──────────────────────────▲      │
//!      └──────────────┴──────────────┴────────────────────┴──────┴──▶ Failed
//! ```
//!
//! The image is always committed before the record. If the image upload
//! fails, the record is never attempted, so callers see all-or-nothing even
//! though the two commits are not transactional in the repository.

use crate::naming::{NamingResolver, IMAGE_DIR, RECORD_DIR};
use crate::normalizer::{normalize, SubmissionRecord};
use crate::repository::ContentRepository;
use crate::uploader::{RetryPolicy, UploadError, UploadExecutor};
use crate::validator::{field_presence, validate, ValidationError};
use axum::http::StatusCode;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

/// Pipeline failure, already classified for the response.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upload(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Where a pipeline run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Validating,
    Normalizing,
    UploadingImage,
    UploadingRecord,
    Done,
    Failed(String),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Legal edges of the pipeline state machine.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Done, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Validating, Normalizing) => true,
            (Normalizing, UploadingImage) | (Normalizing, UploadingRecord) => true,
            (UploadingImage, UploadingRecord) => true,
            (UploadingRecord, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => f.write_str("validating"),
            Self::Normalizing => f.write_str("normalizing"),
            Self::UploadingImage => f.write_str("uploading_image"),
            Self::UploadingRecord => f.write_str("uploading_record"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Tracks one run through the state machine.
#[derive(Debug)]
struct Run {
    state: PipelineState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Validating,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
    }

    fn fail(&mut self, error: impl Into<PipelineError>) -> PipelineError {
        let error = error.into();
        let reason = match &error {
            PipelineError::Validation(e) => e.code(),
            PipelineError::Upload(_) => "upload_failed",
            PipelineError::Internal(_) => "internal_error",
        };
        warn!(state = %self.state, reason = reason, "Pipeline failed");
        self.advance(PipelineState::Failed(reason.to_string()));
        error
    }
}

/// Result of a fully committed submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub submission_id: Uuid,
    /// Repository path of the JSON record
    pub record_path: String,
    /// Repository path of the image, when one was uploaded
    pub image_path: Option<String>,
    /// Content hash of the committed record
    pub sha: String,
    pub record: SubmissionRecord,
}

/// The ingestion pipeline. Built once per process and shared read-only.
pub struct SubmissionPipeline {
    repository: Arc<dyn ContentRepository>,
    resolver: NamingResolver,
    executor: UploadExecutor,
    branch: String,
}

impl SubmissionPipeline {
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        policy: RetryPolicy,
        branch: impl Into<String>,
    ) -> Self {
        let branch = branch.into();
        Self {
            resolver: NamingResolver::new(repository.clone(), branch.clone()),
            executor: UploadExecutor::new(repository.clone(), policy),
            repository,
            branch,
        }
    }

    /// The repository collaborator, for health probes.
    pub fn repository(&self) -> &Arc<dyn ContentRepository> {
        &self.repository
    }

    /// Run one submission from raw body to committed record.
    #[instrument(skip(self, body), fields(submission_id = tracing::field::Empty, body_bytes = body.len()))]
    pub async fn process(&self, body: &[u8]) -> Result<SubmissionOutcome, PipelineError> {
        let submission_id = Uuid::new_v4();
        Span::current().record("submission_id", tracing::field::display(submission_id));
        let mut run = Run::new();

        let request = match validate(body) {
            Ok(request) => request,
            Err(e) => {
                let [name, email, message, image, filename] = field_presence(body);
                info!(
                    has_name = name.1,
                    has_email = email.1,
                    has_message = message.1,
                    has_image = image.1,
                    has_filename = filename.1,
                    "Submission rejected"
                );
                return Err(run.fail(e));
            }
        };
        debug!(has_image = request.has_image(), "Submission accepted");
        run.advance(PipelineState::Normalizing);

        let normalized = normalize(request, Utc::now()).map_err(|e| run.fail(e))?;
        let mut record = normalized.record;

        let image_path = match normalized.image {
            Some(artifact) => {
                run.advance(PipelineState::UploadingImage);
                let target = self.resolver.resolve_image(&artifact).await;
                self.executor.ensure_directory(IMAGE_DIR, &self.branch).await;
                let receipt = self
                    .executor
                    .upload(&target)
                    .await
                    .map_err(|e| run.fail(e))?;
                record = record.with_image_ref(receipt.path.clone());
                Some(receipt.path)
            }
            None => None,
        };

        run.advance(PipelineState::UploadingRecord);
        let target = self
            .resolver
            .resolve_record(&record)
            .map_err(|e| run.fail(PipelineError::Internal(e.to_string())))?;
        self.executor.ensure_directory(RECORD_DIR, &self.branch).await;
        let receipt = self
            .executor
            .upload(&target)
            .await
            .map_err(|e| run.fail(e))?;

        run.advance(PipelineState::Done);
        info!(
            record_path = %receipt.path,
            image_path = image_path.as_deref().unwrap_or("-"),
            sha = %receipt.sha,
            "Submission committed"
        );

        Ok(SubmissionOutcome {
            submission_id,
            record_path: receipt.path,
            image_path,
            sha: receipt.sha,
            record,
        })
    }
}
