use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use submission_service::repository::{
    ContentDescriptor, ContentRepository, EntryKind, RemoteEntry, RepositoryError,
    RepositoryInfo, RepositoryResult,
};

/// One attempted write, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub path: String,
    pub message: String,
    pub content: Vec<u8>,
    pub branch: String,
    pub succeeded: bool,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    attempts: Vec<Commit>,
    /// Path prefix -> remaining transient failures
    failures: HashMap<String, usize>,
    /// Path prefix -> status of a permanent rejection
    rejections: HashMap<String, u16>,
    probe_error: bool,
}

/// In-memory content repository that records every write attempt.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    probes: AtomicUsize,
}

#[allow(dead_code)]
impl InMemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a file that exists before the test starts.
    pub fn with_file(self: Arc<Self>, path: &str, content: &[u8]) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_vec());
        self
    }

    /// The next `times` writes under `prefix` fail with a 503.
    pub fn fail_times(self: Arc<Self>, prefix: &str, times: usize) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(prefix.to_string(), times);
        self
    }

    /// Every write under `prefix` is rejected with `status`.
    pub fn reject(self: Arc<Self>, prefix: &str, status: u16) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .rejections
            .insert(prefix.to_string(), status);
        self
    }

    /// Existence probes fail with a transport error.
    pub fn failing_probes(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().unwrap().probe_error = true;
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn json(&self, path: &str) -> serde_json::Value {
        let bytes = self
            .file(path)
            .unwrap_or_else(|| panic!("{path} was never committed"));
        serde_json::from_slice(&bytes).expect("committed file is JSON")
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn attempts(&self) -> Vec<Commit> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn attempts_under(&self, prefix: &str) -> Vec<Commit> {
        self.attempts()
            .into_iter()
            .filter(|c| c.path.starts_with(prefix))
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn create_or_update_file(
        &self,
        path: &str,
        message: &str,
        content: &[u8],
        branch: &str,
    ) -> RepositoryResult<ContentDescriptor> {
        let mut state = self.state.lock().unwrap();

        let rejection = state
            .rejections
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, status)| *status);
        let transient = state
            .failures
            .iter_mut()
            .find(|(prefix, remaining)| path.starts_with(prefix.as_str()) && **remaining > 0)
            .map(|(_, remaining)| *remaining -= 1)
            .is_some();

        let result = match (rejection, transient) {
            (Some(status), _) => Err(RepositoryError::Rejected {
                status,
                message: "rejected by test".to_string(),
            }),
            (None, true) => Err(RepositoryError::Server {
                status: 503,
                message: "Service Unavailable".to_string(),
            }),
            (None, false) => {
                state.files.insert(path.to_string(), content.to_vec());
                Ok(ContentDescriptor {
                    path: path.to_string(),
                    sha: format!("sha-{}", state.attempts.len() + 1),
                })
            }
        };

        state.attempts.push(Commit {
            path: path.to_string(),
            message: message.to_string(),
            content: content.to_vec(),
            branch: branch.to_string(),
            succeeded: result.is_ok(),
        });
        result
    }

    async fn get_file(&self, path: &str) -> RepositoryResult<Option<RemoteEntry>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.probe_error {
            return Err(RepositoryError::Transport("connection reset".to_string()));
        }

        if state.files.contains_key(path) {
            return Ok(Some(RemoteEntry {
                path: path.to_string(),
                kind: EntryKind::File,
                sha: Some(format!("sha-of-{path}")),
            }));
        }

        let dir_prefix = format!("{path}/");
        if state.files.keys().any(|p| p.starts_with(&dir_prefix)) {
            return Ok(Some(RemoteEntry {
                path: path.to_string(),
                kind: EntryKind::Directory,
                sha: None,
            }));
        }

        Ok(None)
    }

    async fn get_repo(&self) -> RepositoryResult<RepositoryInfo> {
        Ok(RepositoryInfo {
            full_name: "acme/forms".to_string(),
            default_branch: "main".to_string(),
            private: true,
        })
    }
}
