//! Content repository contract.
//!
//! The repository is an external, versioned object store addressed by
//! owner/repository/path/branch. Owner and repository are bound when a client
//! is constructed; callers only deal in paths.

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a content repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The path, or its parent, does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Client or authorization error; resending the same request will not help.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Transport(_))
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Descriptor of a committed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub path: String,
    /// Content hash assigned by the repository
    pub sha: String,
}

/// Kind of entry found at a probed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Entry found by an existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Present for files; directories have no single hash.
    pub sha: Option<String>,
}

/// Repository metadata returned by the access probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub default_branch: String,
    pub private: bool,
}

/// Operations the pipeline needs from the content repository.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Create `path`, or replace its content, with a single commit on `branch`.
    async fn create_or_update_file(
        &self,
        path: &str,
        message: &str,
        content: &[u8],
        branch: &str,
    ) -> RepositoryResult<ContentDescriptor>;

    /// Existence probe. `Ok(None)` means the path is absent.
    async fn get_file(&self, path: &str) -> RepositoryResult<Option<RemoteEntry>>;

    /// Existence and access probe for the repository itself.
    async fn get_repo(&self) -> RepositoryResult<RepositoryInfo>;
}
