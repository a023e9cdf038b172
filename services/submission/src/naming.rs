//! Repository paths for submission records and images.
//!
//! Record paths double as the submission's idempotency key: two submissions
//! carrying the same instant map to the same file and the later commit wins.
//! Image paths only avoid the literal, pre-existing name; they do not
//! guarantee global uniqueness.

use crate::normalizer::{ImageArtifact, SubmissionRecord};
use crate::repository::ContentRepository;
use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const RECORD_DIR: &str = "submissions";
pub const IMAGE_DIR: &str = "images";
pub const RECORD_COMMIT_MESSAGE: &str = "New form submission";

/// A single commit to perform. Built once per artifact and reused across retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub path: String,
    pub content: Vec<u8>,
    pub commit_message: String,
    pub branch: String,
}

/// Record path for an instant: `submissions/2024-01-01T00-00-00-000Z.json`.
///
/// Millisecond precision unless the instant carries sub-millisecond digits,
/// so distinct instants never share a path.
pub fn record_path(instant: DateTime<Utc>) -> String {
    let stamp = if instant.nanosecond() % 1_000_000 == 0 {
        instant.format("%Y-%m-%dT%H-%M-%S-%3f")
    } else {
        instant.format("%Y-%m-%dT%H-%M-%S-%9f")
    };
    format!("{RECORD_DIR}/{stamp}Z.json")
}

/// Record path for a timestamp that names no instant, such as a local time
/// or a plain date: `:` and `.` become `-`, and `Z` is appended unless present.
///
/// Any other character that cannot appear in a single path component
/// becomes `_`.
pub fn literal_record_path(timestamp: &str) -> String {
    let mut stamp: String = timestamp
        .trim()
        .chars()
        .map(|c| match c {
            ':' | '.' => '-',
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '+' => c,
            _ => '_',
        })
        .collect();
    if !stamp.ends_with('Z') {
        stamp.push('Z');
    }
    format!("{RECORD_DIR}/{stamp}.json")
}

/// Record path for a normalized record.
pub fn record_path_for(record: &SubmissionRecord) -> String {
    match record.submitted_at() {
        Some(instant) => record_path(instant),
        None => literal_record_path(record.timestamp()),
    }
}

/// Image path before collision handling.
pub fn image_path(filename: &str) -> String {
    format!("{IMAGE_DIR}/{filename}")
}

/// Image path after a collision: `images/<epochMillis>-<filename>`.
pub fn rewritten_image_path(filename: &str, epoch_millis: i64) -> String {
    format!("{IMAGE_DIR}/{epoch_millis}-{filename}")
}

/// Computes upload targets, probing the repository for image collisions.
#[derive(Clone)]
pub struct NamingResolver {
    repository: Arc<dyn ContentRepository>,
    branch: String,
}

impl NamingResolver {
    pub fn new(repository: Arc<dyn ContentRepository>, branch: impl Into<String>) -> Self {
        Self {
            repository,
            branch: branch.into(),
        }
    }

    /// Target for the JSON record.
    pub fn resolve_record(&self, record: &SubmissionRecord) -> serde_json::Result<UploadTarget> {
        Ok(UploadTarget {
            path: record_path_for(record),
            content: record.to_json_bytes()?,
            commit_message: RECORD_COMMIT_MESSAGE.to_string(),
            branch: self.branch.clone(),
        })
    }

    /// Target for an image, rewritten once if the plain name is already taken
    /// or its availability cannot be confirmed.
    #[instrument(skip(self, artifact), fields(filename = %artifact.filename))]
    pub async fn resolve_image(&self, artifact: &ImageArtifact) -> UploadTarget {
        let candidate = image_path(&artifact.filename);

        let path = match self.repository.get_file(&candidate).await {
            Ok(None) => candidate,
            Ok(Some(_)) => {
                let rewritten =
                    rewritten_image_path(&artifact.filename, Utc::now().timestamp_millis());
                info!(original = %candidate, rewritten = %rewritten, "Image name taken, rewriting");
                rewritten
            }
            // An unconfirmed name could belong to an image an older record references
            Err(e) => {
                let rewritten =
                    rewritten_image_path(&artifact.filename, Utc::now().timestamp_millis());
                warn!(path = %candidate, rewritten = %rewritten, error = %e, "Image existence probe failed, rewriting");
                rewritten
            }
        };

        debug!(path = %path, size_bytes = artifact.bytes.len(), mime = %artifact.mime_type(), "Image target resolved");

        UploadTarget {
            path,
            content: artifact.bytes.clone(),
            commit_message: format!("Upload image {}", artifact.filename),
            branch: self.branch.clone(),
        }
    }
}
