//! Submission Service
//!
//! Form submission ingestion for static sites. A browser posts a JSON form
//! (name, email, message, optional base64 image); the service validates it,
//! commits the image and a JSON record to a GitHub-compatible content
//! repository, and answers with CORS headers on every response.
//!
//! ## Architecture
//!
//! ```text
//! POST /submit-form
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Validator    │──▶│ Normalizer   │──▶│ Naming       │
//! └──────────────┘   └──────────────┘   │ Resolver     │
//!                                       └──────────────┘
//!                                              │
//!                                              ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Response     │◀──│ Pipeline     │◀──│ Upload       │──▶ Content
//! │ Assembler    │   │ (state)      │   │ Executor     │    Repository
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! The image, when present, is always committed before the record; a failed
//! image upload means no record is written.

pub mod api;
pub mod config;
pub mod github;
pub mod naming;
pub mod normalizer;
pub mod pipeline;
pub mod repository;
pub mod response;
pub mod uploader;
pub mod validator;

pub use api::{create_router, start_api_server, AppState};
pub use config::{Config, ConfigurationError};
pub use github::GitHubContentClient;
pub use pipeline::{PipelineError, PipelineState, SubmissionOutcome, SubmissionPipeline};
pub use repository::{ContentRepository, RepositoryError};
pub use response::{CorsPolicy, ResponseAssembler};
pub use uploader::{RetryPolicy, UploadError, UploadExecutor};
pub use validator::{SubmissionRequest, ValidationError};
