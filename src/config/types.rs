use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Harvest
///
/// Every section may be omitted from the TOML file and falls back to its
/// defaults. Without seeds a crawl drains immediately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default, rename = "user-agent")]
    pub user_agent: UserAgentConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// URLs the crawl starts from
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Record extraction rules; empty means one page record per page
    #[serde(default)]
    pub extract: Vec<ExtractRule>,

    #[serde(default)]
    pub links: LinksConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum link depth followed from the seeds (seeds are depth 0)
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of concurrent fetch pipelines
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: u32,

    /// Stop after this many URLs have been dispatched
    #[serde(rename = "max-pages", skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u64>,

    /// Stop after this many seconds of crawling
    #[serde(rename = "time-budget-secs", skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,

    /// How long in-flight pipelines may run after a stop before being aborted
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,

    /// Whether robots.txt rules and crawl-delay are honored
    #[serde(rename = "respect-robots")]
    pub respect_robots: bool,

    /// Hosts links may be followed to; empty means the hosts of the seeds
    #[serde(rename = "allowed-domains")]
    pub allowed_domains: Vec<String>,

    /// Total time allowed for one HTTP request (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Time allowed to establish a connection (seconds)
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_concurrency: 4,
            max_pages: None,
            time_budget_secs: None,
            shutdown_grace_ms: 5_000,
            respect_robots: true,
            allowed_domains: Vec::new(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Per-host politeness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum time between two requests to the same host (milliseconds)
    #[serde(rename = "min-interval-ms")]
    pub min_interval_ms: u64,

    /// First backoff applied after a throttling response (milliseconds)
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Upper bound of the throttling backoff (milliseconds)
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

/// Retry policy for transient fetch failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; a URL gets `max-retries + 1` attempts
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    pub multiplier: f64,

    /// Random spread applied to each delay, as a fraction (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email", skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "Sumi-Harvest".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            contact_email: None,
        }
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// `Name/Version (+url; email)`, with the parenthesized part reduced to
    /// whatever contact details are configured.
    pub fn header_value(&self) -> String {
        let mut contact = Vec::new();
        if let Some(url) = &self.contact_url {
            contact.push(format!("+{}", url));
        }
        if let Some(email) = &self.contact_email {
            contact.push(email.clone());
        }

        if contact.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} ({})",
                self.crawler_name,
                self.crawler_version,
                contact.join("; ")
            )
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Optional file receiving a copy of the log
    #[serde(rename = "log-file", skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "harvest.db".to_string(),
            log_file: None,
        }
    }
}

/// One record extraction rule
///
/// ```toml
/// [[extract]]
/// name = "listing"
/// container = "div.card"
/// key-fields = ["url"]
///
/// [extract.fields]
/// title = "h2.title"
/// price = "span.price"
/// url = "a.details@href"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRule {
    pub name: String,

    /// Each element matching this selector yields one record
    pub container: String,

    /// Field name to selector inside the container, `selector@attribute`
    /// reads an attribute instead of the text
    pub fields: BTreeMap<String, String>,

    /// Fields that identify a record; empty means all fields
    #[serde(default, rename = "key-fields")]
    pub key_fields: Vec<String>,
}

/// Link discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Selectors whose `href` (or `@attribute`) yields links to follow
    pub follow: Vec<String>,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            follow: vec!["a[href]".to_string(), "link[rel=canonical]".to_string()],
        }
    }
}

/// Values that replace parts of the file configuration, taken from the
/// command line or the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub seeds: Vec<String>,
    pub concurrency: Option<u32>,
    pub interval_ms: Option<u64>,
    pub max_depth: Option<u32>,
    pub max_pages: Option<u64>,
    pub max_retries: Option<u32>,
    pub database: Option<String>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
            && self.concurrency.is_none()
            && self.interval_ms.is_none()
            && self.max_depth.is_none()
            && self.max_pages.is_none()
            && self.max_retries.is_none()
            && self.database.is_none()
    }
}
