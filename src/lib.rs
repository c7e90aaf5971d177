//! Sumi-Harvest: a polite crawling and extraction engine
//!
//! This crate fetches pages under per-host rate limits, extracts structured
//! records with configurable CSS rules, deduplicates them and persists them
//! to SQLite. Transient network failures are retried with backoff; a failed
//! URL never stops the crawl, only fatal errors (configuration, storage) do.

pub mod config;
pub mod crawler;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Sumi-Harvest operations
///
/// Every variant of this type is fatal for a crawl: once one reaches the
/// orchestrator the run stops. Per-URL failures use [`FetchError`] and
/// [`ParseError`] instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid crawl phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("Pipeline task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a fetch for a single URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transient failure (timeout, connection error, 5xx, 429); worth retrying
    #[error("Retryable failure for {url}: {reason}")]
    Retryable {
        url: String,
        reason: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    /// Permanent failure for this URL (malformed URL, blocked scheme, 4xx)
    #[error("Fatal failure for {url}: {reason}")]
    Fatal {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    /// The retry budget ran out on retryable failures
    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

impl FetchError {
    /// Returns true if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// The URL the failure belongs to
    pub fn url(&self) -> &str {
        match self {
            Self::Retryable { url, .. }
            | Self::Fatal { url, .. }
            | Self::RetriesExhausted { url, .. } => url,
        }
    }

    /// HTTP status of the failed response, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retryable { status, .. } | Self::Fatal { status, .. } => *status,
            Self::RetriesExhausted { .. } => None,
        }
    }
}

/// Content of a fetched page could not be parsed
#[derive(Debug, Clone, Error)]
#[error("Parse error for {url}: {message}")]
pub struct ParseError {
    pub url: String,
    pub message: String,
}

impl ParseError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, Orchestrator};
pub use state::{CrawlPhase, HostState, TaskOutcome};
pub use url::{extract_host, normalize_url};
