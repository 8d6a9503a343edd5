//! Connection settings for the CTFd instance.

use std::time::Duration;
use thiserror::Error;

/// Default timeout applied to every HTTP request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while building the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Where and how to reach CTFd.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the CTFd instance, without the `/api/v1` suffix.
    pub url: String,
    /// Admin access token.
    pub api_key: Option<String>,
    /// Timeout for individual HTTP requests.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CTFD_URL`: Base URL of the instance (required)
    /// - `CTFD_API_KEY`: Admin access token (optional)
    /// - `CTFD_TIMEOUT_SECS`: Request timeout in seconds (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("CTFD_URL")
            .map_err(|_| ConfigError::MissingEnvVar("CTFD_URL".to_string()))?;
        let mut config = Self::new(url, std::env::var("CTFD_API_KEY").ok());

        if let Ok(val) = std::env::var("CTFD_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CTFD_TIMEOUT_SECS")?;
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }

        if self.timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// URL of the API root, e.g. `https://ctf.example.org/api/v1`.
    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.url.trim_end_matches('/'))
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
