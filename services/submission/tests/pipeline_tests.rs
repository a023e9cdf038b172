//! End-to-end pipeline behaviour against an in-memory repository.

mod common;

use common::{body, pipeline, InMemoryRepository};
use serde_json::json;
use submission_service::{PipelineError, ValidationError};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn with_image(filename: &str) -> Vec<u8> {
    body(json!({
        "name": "A",
        "email": "a@x.com",
        "message": "hi",
        "timestamp": "2024-01-01T00:00:00.000Z",
        "image": "data:image/png;base64,AAAA",
        "filename": filename
    }))
}

#[tokio::test]
async fn test_record_without_image() {
    let repo = InMemoryRepository::new();
    let outcome = assert_ok!(
        pipeline(repo.clone())
            .process(&body(json!({
                "name": "A",
                "email": "a@x.com",
                "message": "hi",
                "timestamp": "2024-01-01T00:00:00.000Z"
            })))
            .await
    );

    assert_eq!(outcome.record_path, "submissions/2024-01-01T00-00-00-000Z.json");
    assert_eq!(outcome.image_path, None);

    let record = repo.json("submissions/2024-01-01T00-00-00-000Z.json");
    assert_eq!(
        record,
        json!({
            "name": "A",
            "email": "a@x.com",
            "message": "hi",
            "timestamp": "2024-01-01T00:00:00.000Z"
        })
    );

    let commits = repo.attempts_under("submissions/2024");
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "New form submission");
    assert_eq!(commits[0].branch, "main");
}

#[tokio::test]
async fn test_missing_directory_is_bootstrapped() {
    let repo = InMemoryRepository::new();
    assert_ok!(pipeline(repo.clone()).process(&with_image("pic.png")).await);

    assert_eq!(repo.file("images/.gitkeep"), Some(Vec::new()));
    assert_eq!(repo.file("submissions/.gitkeep"), Some(Vec::new()));
    assert_eq!(repo.attempts_under("images/.gitkeep")[0].message, "Create images directory");
}

#[tokio::test]
async fn test_existing_directory_not_bootstrapped_again() {
    let repo = InMemoryRepository::new().with_file("submissions/.gitkeep", b"");
    assert_ok!(
        pipeline(repo.clone())
            .process(&body(json!({ "name": "A", "email": "a@x.com", "message": "hi" })))
            .await
    );

    assert!(repo.attempts_under("submissions/.gitkeep").is_empty());
}

#[tokio::test]
async fn test_image_uploaded_before_record() {
    let repo = InMemoryRepository::new();
    let outcome = assert_ok!(pipeline(repo.clone()).process(&with_image("pic.png")).await);

    assert_eq!(outcome.image_path.as_deref(), Some("images/pic.png"));
    assert_eq!(repo.file("images/pic.png"), Some(vec![0, 0, 0]));

    let record = repo.json(&outcome.record_path);
    assert_eq!(record["imageRef"], "images/pic.png");

    let order: Vec<String> = repo
        .attempts()
        .into_iter()
        .filter(|c| !c.path.ends_with(".gitkeep"))
        .map(|c| c.path)
        .collect();
    assert_eq!(
        order,
        vec![
            "images/pic.png".to_string(),
            "submissions/2024-01-01T00-00-00-000Z.json".to_string()
        ]
    );
}

#[tokio::test]
async fn test_colliding_image_name_rewritten() {
    let repo = InMemoryRepository::new().with_file("images/pic.png", b"old");
    let before = chrono::Utc::now().timestamp_millis();
    let outcome = assert_ok!(pipeline(repo.clone()).process(&with_image("pic.png")).await);
    let after = chrono::Utc::now().timestamp_millis();

    let image_path = outcome.image_path.expect("image was uploaded");
    let millis: i64 = image_path
        .strip_prefix("images/")
        .and_then(|rest| rest.strip_suffix("-pic.png"))
        .and_then(|m| m.parse().ok())
        .expect("rewritten path carries an epoch-millis prefix");
    assert!(before <= millis && millis <= after);

    // The original is untouched and the record points at the new name
    assert_eq!(repo.file("images/pic.png"), Some(b"old".to_vec()));
    assert_eq!(repo.json(&outcome.record_path)["imageRef"], image_path);
}

#[tokio::test]
async fn test_unconfirmed_image_name_never_overwrites() {
    let repo = InMemoryRepository::new()
        .with_file("images/pic.png", b"old")
        .failing_probes();
    let outcome = assert_ok!(pipeline(repo.clone()).process(&with_image("pic.png")).await);

    let image_path = outcome.image_path.expect("image was uploaded");
    assert_ne!(image_path, "images/pic.png");
    assert!(image_path.ends_with("-pic.png"));
    assert_eq!(repo.file("images/pic.png"), Some(b"old".to_vec()));
    assert!(repo.attempts_under("images/pic.png").is_empty());
    assert!(repo.attempts_under("images/.gitkeep").is_empty());
}

#[tokio::test]
async fn test_offsetless_timestamp_stored_as_given() {
    let repo = InMemoryRepository::new();
    let outcome = assert_ok!(
        pipeline(repo.clone())
            .process(&body(json!({
                "name": "A",
                "email": "a@x.com",
                "message": "hi",
                "timestamp": "2024-01-01T00:00:00.000"
            })))
            .await
    );

    assert_eq!(outcome.record_path, "submissions/2024-01-01T00-00-00-000Z.json");
    let record = repo.json(&outcome.record_path);
    assert_eq!(record["timestamp"], "2024-01-01T00:00:00.000");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_with_linear_backoff() {
    let repo = InMemoryRepository::new().fail_times("submissions/2024", 2);
    let started = Instant::now();
    assert_ok!(
        pipeline(repo.clone())
            .process(&body(json!({
                "name": "A",
                "email": "a@x.com",
                "message": "hi",
                "timestamp": "2024-01-01T00:00:00.000Z"
            })))
            .await
    );

    // 1s then 2s between the three attempts
    let elapsed = started.elapsed();
    assert!(elapsed >= std::time::Duration::from_secs(3));
    assert!(elapsed < std::time::Duration::from_secs(4));

    let attempts = repo.attempts_under("submissions/2024");
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|c| c.succeeded).collect::<Vec<_>>(),
        vec![false, false, true]
    );
}

#[tokio::test(start_paused = true)]
async fn test_image_failure_aborts_before_record() {
    let repo = InMemoryRepository::new().fail_times("images/pic.png", usize::MAX);
    let err = assert_err!(pipeline(repo.clone()).process(&with_image("pic.png")).await);

    match err {
        PipelineError::Upload(e) => {
            assert_eq!(e.path(), "images/pic.png");
            assert_eq!(e.attempts(), 3);
        }
        other => panic!("expected upload failure, got {other:?}"),
    }
    assert_eq!(repo.attempts_under("images/pic.png").len(), 3);
    assert!(repo.attempts_under("submissions/").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_rejection_not_retried() {
    let repo = InMemoryRepository::new().reject("submissions/2024", 401);
    let started = Instant::now();
    let err = assert_err!(
        pipeline(repo.clone())
            .process(&body(json!({
                "name": "A",
                "email": "a@x.com",
                "message": "hi",
                "timestamp": "2024-01-01T00:00:00.000Z"
            })))
            .await
    );

    assert!(matches!(err, PipelineError::Upload(ref e) if e.attempts() == 1));
    assert_eq!(repo.attempts_under("submissions/2024").len(), 1);
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_invalid_input_touches_nothing() {
    let cases = [
        (b"not json".to_vec(), "malformed_body"),
        (body(json!(["a", "b"])), "malformed_body"),
        (body(json!({ "email": "a@x.com", "message": "hi" })), "missing_required_field"),
        (body(json!({ "name": "A", "email": "a@x.com", "message": 7 })), "invalid_field"),
        (
            body(json!({
                "name": "A", "email": "a@x.com", "message": "hi",
                "image": "data:image/png;base64,AAAA"
            })),
            "invalid_image_format",
        ),
        (
            body(json!({
                "name": "A", "email": "a@x.com", "message": "hi",
                "image": "data:text/plain;base64,AAAA", "filename": "a.txt"
            })),
            "invalid_image_format",
        ),
    ];

    for (input, code) in cases {
        let repo = InMemoryRepository::new();
        let err = assert_err!(pipeline(repo.clone()).process(&input).await);
        match err {
            PipelineError::Validation(ref e) => assert_eq!(e.code(), code),
            other => panic!("expected validation error {code}, got {other:?}"),
        }
        assert!(repo.attempts().is_empty(), "{code} must not write");
        assert_eq!(repo.probe_count(), 0, "{code} must not probe");
    }
}

#[tokio::test]
async fn test_missing_name_reported_first() {
    let repo = InMemoryRepository::new();
    let err = assert_err!(pipeline(repo).process(&body(json!({}))).await);
    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::MissingRequiredField("name"))
    ));
}
