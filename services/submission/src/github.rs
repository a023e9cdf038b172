//! GitHub REST "contents" API client.

use crate::config::{ConfigurationError, RepositoryConfig, RepositoryIdentity};
use crate::repository::{
    ContentDescriptor, ContentRepository, EntryKind, RemoteEntry, RepositoryError,
    RepositoryInfo, RepositoryResult,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Content repository backed by the GitHub contents API.
pub struct GitHubContentClient {
    http: reqwest::Client,
    base_url: Url,
    identity: RepositoryIdentity,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: Option<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    path: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
    default_branch: String,
    #[serde(default)]
    private: bool,
}

impl GitHubContentClient {
    /// Create a client for the configured repository.
    pub fn new(config: &RepositoryConfig) -> Result<Self, ConfigurationError> {
        let identity = config.identity()?;

        let base_url =
            Url::parse(&config.api_base_url).map_err(|e| ConfigurationError::InvalidValue {
                field: "repository.api_base_url".to_string(),
                message: e.to_string(),
            })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigurationError::InvalidValue {
                field: "repository.api_base_url".to_string(),
                message: "URL cannot be used as a base".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "repository".to_string(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        info!(
            owner = %identity.owner,
            repository = %identity.name,
            branch = %identity.branch,
            api = %base_url,
            token = %config.token_fingerprint(),
            "Content API client initialized"
        );

        Ok(Self {
            http,
            base_url,
            identity,
        })
    }

    /// Build `{base}/repos/{owner}/{repo}[/contents/{path}]`, encoding each segment.
    fn repo_url(&self, contents_path: Option<&str>) -> RepositoryResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RepositoryError::Decode("API base URL has no path".to_string()))?;
            segments
                .pop_if_empty()
                .extend(["repos", self.identity.owner.as_str(), self.identity.name.as_str()]);
            if let Some(path) = contents_path {
                segments
                    .push("contents")
                    .extend(path.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RepositoryResult<Response> {
        request
            .bearer_auth(&self.identity.token)
            .send()
            .await
            .map_err(|e| RepositoryError::Transport(e.to_string()))
    }

    async fn put_contents(
        &self,
        path: &str,
        body: &PutContentsRequest<'_>,
    ) -> RepositoryResult<ContentDescriptor> {
        let url = self.repo_url(Some(path))?;
        let response = self.send(self.http.put(url).json(body)).await?;
        let response = check_status(response, path).await?;

        let parsed: PutContentsResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let item = parsed
            .content
            .ok_or_else(|| RepositoryError::Decode("response carries no content".to_string()))?;

        Ok(ContentDescriptor {
            path: item.path,
            sha: item.sha,
        })
    }
}

#[async_trait]
impl ContentRepository for GitHubContentClient {
    #[instrument(skip(self, message, content), fields(size_bytes = content.len()))]
    async fn create_or_update_file(
        &self,
        path: &str,
        message: &str,
        content: &[u8],
        branch: &str,
    ) -> RepositoryResult<ContentDescriptor> {
        let mut body = PutContentsRequest {
            message,
            content: STANDARD.encode(content),
            branch,
            sha: None,
        };

        match self.put_contents(path, &body).await {
            // Replacing an existing file requires its current sha
            Err(RepositoryError::Rejected { status: 422, .. }) => {
                let existing = self.get_file(path).await?.and_then(|entry| entry.sha);
                let Some(sha) = existing else {
                    return Err(RepositoryError::Rejected {
                        status: 422,
                        message: format!("{path} was rejected and has no existing sha"),
                    });
                };
                debug!(path = %path, "Replacing existing file");
                body.sha = Some(sha);
                self.put_contents(path, &body).await
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn get_file(&self, path: &str) -> RepositoryResult<Option<RemoteEntry>> {
        let url = self.repo_url(Some(path))?;
        let request = self
            .http
            .get(url)
            .query(&[("ref", self.identity.branch.as_str())]);

        let response = match check_status(self.send(request).await?, path).await {
            Ok(response) => response,
            Err(RepositoryError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        // Directories come back as an array of their entries
        let entry = if value.is_array() {
            RemoteEntry {
                path: path.to_string(),
                kind: EntryKind::Directory,
                sha: None,
            }
        } else {
            RemoteEntry {
                path: value
                    .get("path")
                    .and_then(|v| v.as_str())
                    .unwrap_or(path)
                    .to_string(),
                kind: match value.get("type").and_then(|v| v.as_str()) {
                    Some("dir") => EntryKind::Directory,
                    _ => EntryKind::File,
                },
                sha: value.get("sha").and_then(|v| v.as_str()).map(String::from),
            }
        };

        Ok(Some(entry))
    }

    #[instrument(skip(self))]
    async fn get_repo(&self) -> RepositoryResult<RepositoryInfo> {
        let url = self.repo_url(None)?;
        let response = self.send(self.http.get(url)).await?;
        let response = check_status(response, &self.identity.name).await?;

        let repo: RepoResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(RepositoryInfo {
            full_name: repo.full_name,
            default_branch: repo.default_branch,
            private: repo.private,
        })
    }
}

/// Map non-success statuses onto the repository error taxonomy.
async fn check_status(response: Response, path: &str) -> RepositoryResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(response).await;
    if status == StatusCode::NOT_FOUND {
        return Err(RepositoryError::NotFound(path.to_string()));
    }

    warn!(status = status.as_u16(), path = %path, message = %message, "Content API error");

    if status.is_server_error() {
        Err(RepositoryError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(RepositoryError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Prefer the API's `message` field over the raw body.
async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body)
}
