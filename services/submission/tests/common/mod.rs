pub mod memory;

#[allow(unused_imports)]
pub use memory::{Commit, InMemoryRepository};

use std::sync::Arc;
use std::time::Duration;
use submission_service::{
    create_router, AppState, ConfigurationError, CorsPolicy, ResponseAssembler, RetryPolicy,
    SubmissionPipeline,
};

/// Retry policy used across the suites: three attempts, one second apart.
#[allow(dead_code)]
pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
    }
}

#[allow(dead_code)]
pub fn pipeline(repository: Arc<InMemoryRepository>) -> SubmissionPipeline {
    SubmissionPipeline::new(repository, test_policy(), "main")
}

/// Router wired to an in-memory repository with the given CORS policy.
#[allow(dead_code)]
pub fn router(repository: Arc<InMemoryRepository>, cors: CorsPolicy) -> axum::Router {
    let state = AppState::new(pipeline(repository), ResponseAssembler::new(cors, false));
    create_router(state, &Default::default())
}

/// Router for a process whose repository settings are missing.
#[allow(dead_code)]
pub fn misconfigured_router() -> axum::Router {
    let state = AppState::misconfigured(
        ConfigurationError::MissingSettings(vec!["repository.token"]),
        ResponseAssembler::new(CorsPolicy::wildcard(), false),
    );
    create_router(state, &Default::default())
}

#[allow(dead_code)]
pub fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("serializable test body")
}
