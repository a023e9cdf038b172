use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the submission service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Content repository configuration
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Upload retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port (0 disables the exporter)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Include technical error details in responses
    #[serde(default)]
    pub debug: bool,
}

/// Content repository configuration
#[derive(Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Repository owner (user or organisation)
    pub owner: Option<String>,
    /// Repository name
    pub name: Option<String>,
    /// Access token for the content API
    pub token: Option<String>,
    /// Branch every commit targets
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Base URL of the content API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// User agent sent with every API request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Upload retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per upload, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; attempt n+1 waits n times this value
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// API configuration for the submission endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins (empty = wildcard)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// The repository settings that must be present before any submission is accepted.
#[derive(Clone)]
pub struct RepositoryIdentity {
    pub owner: String,
    pub name: String,
    pub token: String,
    pub branch: String,
}

impl std::fmt::Debug for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryIdentity")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("branch", &self.branch)
            .finish()
    }
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "submission-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "submission-service".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

/// Environment variables the original form handler read, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("GITHUB_TOKEN", "repository.token"),
    ("GITHUB_OWNER", "repository.owner"),
    ("GITHUB_REPO", "repository.name"),
    ("GITHUB_BRANCH", "repository.branch"),
];

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("service.metrics_port", default_metrics_port())?;

        // Bare GITHUB_* variables act as defaults beneath every other source
        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_default(*key, value)?;
            }
        }
        if let Ok(origin) = std::env::var("ALLOWED_ORIGIN") {
            builder = builder.set_default("api.cors_origins", vec![origin])?;
        }

        let config = builder
            // Add config file if present
            .add_source(config::File::with_name("config/submission").required(false))
            .add_source(config::File::with_name("/etc/submission/submission").required(false))
            // Override with environment variables
            // SUBMISSION__REPOSITORY__TOKEN -> repository.token
            .add_source(
                config::Environment::with_prefix("SUBMISSION")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate settings that would make the service unusable regardless of repository identity.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        if self.api.max_body_bytes == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "api.max_body_bytes".to_string(),
                message: "Body limit must be greater than 0".to_string(),
            });
        }

        if self.repository.branch.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "repository.branch".to_string(),
                message: "Branch must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the upload backoff unit as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }
}

impl RepositoryConfig {
    /// Resolve the repository identity, listing every missing setting.
    pub fn identity(&self) -> Result<RepositoryIdentity, ConfigurationError> {
        fn present(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        }

        let token = present(&self.token);
        let owner = present(&self.owner);
        let name = present(&self.name);

        match (token, owner, name) {
            (Some(token), Some(owner), Some(name)) => Ok(RepositoryIdentity {
                owner,
                name,
                token,
                branch: self.branch.clone(),
            }),
            (token, owner, name) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push("repository.token");
                }
                if owner.is_none() {
                    missing.push("repository.owner");
                }
                if name.is_none() {
                    missing.push("repository.name");
                }
                Err(ConfigurationError::MissingSettings(missing))
            }
        }
    }

    /// Token shape for diagnostics: a short prefix and the length, never the value.
    pub fn token_fingerprint(&self) -> String {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => {
                let prefix: String = token.chars().take(4).collect();
                format!("{prefix}… ({} chars)", token.chars().count())
            }
            _ => "<unset>".to_string(),
        }
    }

    /// Get the request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl std::fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("token", &self.token_fingerprint())
            .field("branch", &self.branch)
            .field("api_base_url", &self.api_base_url)
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            debug: false,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            owner: None,
            name: None,
            token: None,
            branch: default_branch(),
            api_base_url: default_api_base_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            repository: RepositoryConfig {
                owner: Some("octo".to_string()),
                name: Some("forms".to_string()),
                token: Some("ghp_abcdefghijklmnop".to_string()),
                ..RepositoryConfig::default()
            },
            retry: RetryConfig::default(),
            api: ApiConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_attempts(), 3);
        assert_eq!(default_base_delay_ms(), 1000);
        assert_eq!(default_branch(), "main");
        assert_eq!(default_max_body_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.api.cors_origins.is_empty());
        assert!(!config.service.debug);
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        let identity = config.repository.identity().unwrap();
        assert_eq!(identity.owner, "octo");
        assert_eq!(identity.branch, "main");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = create_test_config();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_identity_lists_every_field() {
        let mut config = create_test_config();
        config.repository.token = None;
        config.repository.name = Some("   ".to_string());

        match config.repository.identity() {
            Err(ConfigurationError::MissingSettings(missing)) => {
                assert_eq!(missing, vec!["repository.token", "repository.name"]);
            }
            other => panic!("expected missing settings, got {other:?}"),
        }
    }

    #[test]
    fn test_token_never_printed() {
        let config = create_test_config();
        let debug = format!("{:?}", config.repository);
        assert!(!debug.contains("ghp_abcdefghijklmnop"));
        assert!(debug.contains("ghp_… (20 chars)"));

        let identity = config.repository.identity().unwrap();
        assert!(!format!("{identity:?}").contains("abcdefgh"));
    }
}
