use crate::config::Config;
use crate::naming::UploadTarget;
use crate::repository::{ContentRepository, RepositoryError};
use backoff::backoff::Backoff;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Name of the placeholder committed to bootstrap a missing directory.
pub const PLACEHOLDER_FILE: &str = ".gitkeep";

/// Errors surfaced by the upload executor.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload of {path} failed after {attempts} attempt(s): {last_error}")]
    Failed {
        path: String,
        attempts: u32,
        #[source]
        last_error: RepositoryError,
    },
}

impl UploadError {
    pub fn path(&self) -> &str {
        match self {
            Self::Failed { path, .. } => path,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Bounded retry policy applied to every upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Attempt n+1 waits n times this value
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    /// Fresh backoff schedule for one upload.
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff {
            base_delay: self.base_delay,
            max_retries: self.max_attempts.saturating_sub(1),
            retries: 0,
        }
    }
}

/// Linear schedule: `base`, `2 × base`, ... then exhaustion.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_retries: u32,
    retries: u32,
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.base_delay * self.retries)
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub path: String,
    pub sha: String,
    pub attempts: u32,
}

/// Outcome of a directory bootstrap. Never an error: failures are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Present,
    Created,
    /// Probe or placeholder commit failed; the upload proceeds regardless
    Unknown,
}

/// Commits upload targets to the content repository with bounded retry.
#[derive(Clone)]
pub struct UploadExecutor {
    repository: Arc<dyn ContentRepository>,
    policy: RetryPolicy,
}

impl UploadExecutor {
    pub fn new(repository: Arc<dyn ContentRepository>, policy: RetryPolicy) -> Self {
        Self { repository, policy }
    }

    /// Upload a target, retrying transient failures.
    #[instrument(skip(self, target), fields(path = %target.path, size_bytes = target.content.len()))]
    pub async fn upload(&self, target: &UploadTarget) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let mut backoff = self.policy.backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            debug!(attempt = attempts, "Uploading to content repository");

            let error = match self
                .repository
                .create_or_update_file(
                    &target.path,
                    &target.commit_message,
                    &target.content,
                    &target.branch,
                )
                .await
            {
                Ok(descriptor) => {
                    metrics::histogram!("submission.upload.duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    info!(
                        sha = %descriptor.sha,
                        attempts = attempts,
                        "Upload committed"
                    );
                    return Ok(UploadReceipt {
                        path: target.path.clone(),
                        sha: descriptor.sha,
                        attempts,
                    });
                }
                Err(e) => e,
            };

            let delay = if error.is_transient() {
                backoff.next_backoff()
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    metrics::counter!("submission.upload.retries").increment(1);
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    metrics::counter!("submission.upload.failures").increment(1);
                    warn!(
                        attempts = attempts,
                        transient = error.is_transient(),
                        error = %error,
                        "Upload failed, giving up"
                    );
                    return Err(UploadError::Failed {
                        path: target.path.clone(),
                        attempts,
                        last_error: error,
                    });
                }
            }
        }
    }

    /// Make sure `dir` exists, committing a placeholder when none is found.
    ///
    /// Only the placeholder is probed; listing the directory itself would grow
    /// with every submission. Best-effort: any failure is logged and reported
    /// as [`DirectoryStatus::Unknown`].
    #[instrument(skip(self))]
    pub async fn ensure_directory(&self, dir: &str, branch: &str) -> DirectoryStatus {
        let placeholder = format!("{dir}/{PLACEHOLDER_FILE}");
        match self.repository.get_file(&placeholder).await {
            Ok(Some(_)) => return DirectoryStatus::Present,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Directory probe failed");
                return DirectoryStatus::Unknown;
            }
        }

        match self
            .repository
            .create_or_update_file(&placeholder, &format!("Create {dir} directory"), &[], branch)
            .await
        {
            Ok(_) => {
                metrics::counter!("submission.directory.bootstrapped").increment(1);
                info!(placeholder = %placeholder, "Directory bootstrapped");
                DirectoryStatus::Created
            }
            Err(e) => {
                warn!(placeholder = %placeholder, error = %e, "Directory bootstrap failed");
                DirectoryStatus::Unknown
            }
        }
    }
}
