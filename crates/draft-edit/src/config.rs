//! Configuration loaded from environment variables.

use draft_sync::ResolutionConfig;
use std::time::Duration;

const DEFAULT_REGISTRY_URL: &str = "http://localhost:8080/apis/registry/v3";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EDITOR: &str = "vi";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the registry REST API (no trailing slash)
    pub registry_url: String,
    /// Per-request timeout for registry calls
    pub request_timeout: Duration,
    /// Editor command line (program plus arguments)
    pub editor: String,
    pub resolution: ResolutionConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `DRAFT_REGISTRY_URL`: registry API base (default: local registry)
    /// - `DRAFT_REQUEST_TIMEOUT_SECS`: request timeout in seconds (default: 30)
    /// - `DRAFT_MAX_ROUNDS`: cap on decisions per save (default: 100)
    /// - `VISUAL` / `EDITOR`: editor command (default: vi)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let registry_url = lookup("DRAFT_REGISTRY_URL")
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
        let registry_url = normalize_url(&registry_url)?;

        let request_timeout = match lookup("DRAFT_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?,
            ),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let mut resolution = ResolutionConfig::default();
        if let Some(raw) = lookup("DRAFT_MAX_ROUNDS") {
            resolution.max_rounds = match raw.trim().parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxRounds(raw)),
            };
        }

        let editor = lookup("VISUAL")
            .or_else(|| lookup("EDITOR"))
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EDITOR.to_string());

        Ok(Self {
            registry_url,
            request_timeout,
            editor,
            resolution,
        })
    }

    /// Override the registry URL (from a CLI flag).
    pub fn with_registry_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.registry_url = normalize_url(url)?;
        Ok(self)
    }
}

fn normalize_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(ConfigError::InvalidRegistryUrl(url.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DRAFT_REGISTRY_URL must be an http(s) URL, got {0:?}")]
    InvalidRegistryUrl(String),

    #[error("DRAFT_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got {0:?}")]
    InvalidTimeout(String),

    #[error("DRAFT_MAX_ROUNDS must be a positive number, got {0:?}")]
    InvalidMaxRounds(String),
}
