//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the crawler's user agent string
//! - Gating every attempt through the per-host rate limiter
//! - Classifying failures as retryable or fatal
//! - Retrying transient failures with backoff

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::retry::RetryPolicy;
use crate::url::extract_host;
use crate::FetchError;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Maximum redirect hops followed for one request
const MAX_REDIRECTS: usize = 10;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The URL that was requested
    pub url: Url,

    /// Final URL after redirects
    pub final_url: Url,

    pub status_code: u16,

    /// Content-Type header value
    pub content_type: Option<String>,

    pub body: String,

    pub fetched_at: DateTime<Utc>,

    /// Attempts it took, including the successful one
    pub attempts: u32,

    /// Last transient error seen before the successful attempt
    pub error: Option<String>,
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `Name/Version (+ContactURL; ContactEmail)`.
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    crawler: &CrawlerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(crawler.request_timeout_secs))
        .connect_timeout(Duration::from_secs(crawler.connect_timeout_secs))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages politely: rate limited per host, retried on transient errors
pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    /// Fetches `url`, retrying retryable failures
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 429 / 503 | Host backoff, then retry |
    /// | HTTP 5xx | Retry |
    /// | Timeout, connection error | Retry |
    /// | Other HTTP 4xx | Fatal |
    /// | Non-http(s) scheme, missing host | Fatal |
    ///
    /// Exhausting the retry budget yields [`FetchError::RetriesExhausted`].
    pub async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let host = fetchable_host(url)?;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;

            match self.attempt(url, &host).await {
                Ok(mut result) => {
                    self.limiter.report_success(&host);
                    result.attempts = attempts;
                    result.error = last_error;
                    return Ok(result);
                }
                Err(FetchError::Retryable {
                    reason,
                    status,
                    retry_after,
                    ..
                }) => {
                    if matches!(status, Some(429) | Some(503)) {
                        self.limiter.report_throttled(&host, retry_after);
                    }

                    if !self.policy.should_retry(attempts) {
                        warn!("Giving up on {} after {} attempts: {}", url, attempts, reason);
                        return Err(FetchError::RetriesExhausted {
                            url: url.to_string(),
                            attempts,
                            last: reason,
                        });
                    }

                    let delay = self.policy.backoff(attempts);
                    debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempts, url, reason, delay
                    );
                    last_error = Some(reason);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One rate-limited request
    async fn attempt(&self, url: &Url, host: &str) -> Result<FetchResult, FetchError> {
        let _permit = self.limiter.acquire(host).await;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status, response.headers()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        Ok(FetchResult {
            url: url.clone(),
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
            fetched_at: Utc::now(),
            attempts: 1,
            error: None,
        })
    }
}

/// Returns the rate-limiting key of `url`, or a fatal error if it cannot be
/// fetched at all
fn fetchable_host(url: &Url) -> Result<String, FetchError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::Fatal {
            url: url.to_string(),
            reason: format!("blocked scheme: {}", url.scheme()),
            status: None,
        });
    }

    extract_host(url).ok_or_else(|| FetchError::Fatal {
        url: url.to_string(),
        reason: "URL has no host".to_string(),
        status: None,
    })
}

/// Maps a non-success HTTP status to a fetch error
fn classify_status(url: &Url, status: StatusCode, headers: &HeaderMap) -> FetchError {
    let code = status.as_u16();
    let reason = format!("HTTP {}", code);

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        FetchError::Retryable {
            url: url.to_string(),
            reason,
            status: Some(code),
            retry_after: parse_retry_after(headers, Utc::now()),
        }
    } else if status.is_server_error() {
        FetchError::Retryable {
            url: url.to_string(),
            reason,
            status: Some(code),
            retry_after: None,
        }
    } else {
        // 4xx, and 3xx the client did not follow
        FetchError::Fatal {
            url: url.to_string(),
            reason,
            status: Some(code),
        }
    }
}

/// Maps a transport error to a fetch error
fn classify_request_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        retryable(url, "request timed out")
    } else if error.is_connect() {
        retryable(url, &format!("connection failed: {}", error))
    } else if error.is_body() || error.is_request() {
        retryable(url, &format!("request failed: {}", error))
    } else if error.is_redirect() {
        FetchError::Fatal {
            url: url.to_string(),
            reason: format!("redirect error: {}", error),
            status: None,
        }
    } else {
        FetchError::Fatal {
            url: url.to_string(),
            reason: error.to_string(),
            status: None,
        }
    }
}

fn retryable(url: &Url, reason: &str) -> FetchError {
    FetchError::Retryable {
        url: url.to_string(),
        reason: reason.to_string(),
        status: None,
        retry_after: None,
    }
}

/// Parses a `Retry-After` header given in seconds or as an HTTP date
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    // A date in the past means no wait
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
