//! Per-host robots.txt cache
//!
//! robots.txt is fetched at most once per host per day. The fetch itself
//! goes through the rate limiter like any other request to the host.

use crate::crawler::RateLimiter;
use crate::robots::ParsedRobots;
use crate::url::extract_host;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Cached robots.txt data for a host
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        self.age() > Duration::hours(24)
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        self.content.is_allowed(url, user_agent)
    }

    /// The crawl delay in seconds, if specified
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        self.content.crawl_delay(user_agent)
    }
}

type HostEntry = Arc<Mutex<Option<Arc<CachedRobots>>>>;

/// Fetches and caches robots.txt per host
///
/// Concurrent lookups for the same host wait on one fetch; lookups for
/// other hosts are independent.
pub struct RobotsCache {
    client: Client,
    /// Product token matched against User-agent groups
    agent: String,
    limiter: Arc<RateLimiter>,
    hosts: DashMap<String, HostEntry>,
}

impl RobotsCache {
    pub fn new(client: Client, agent: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            agent: agent.into(),
            limiter,
            hosts: DashMap::new(),
        }
    }

    /// Checks whether `url` may be crawled
    ///
    /// The first check for a host fetches its robots.txt and applies any
    /// `Crawl-delay` to the rate limiter.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        match self.robots_for(url).await {
            Some(robots) => robots.is_allowed(url.as_str(), &self.agent),
            None => true,
        }
    }

    /// Returns the cached robots.txt of the host of `url`, fetching it first
    /// if missing or stale
    pub async fn robots_for(&self, url: &Url) -> Option<Arc<CachedRobots>> {
        let host = extract_host(url)?;

        // Clone the entry out so no shard lock is held across the fetch
        let entry = Arc::clone(self.hosts.entry(host.clone()).or_default().value());
        let mut cached = entry.lock().await;

        if let Some(robots) = cached.as_ref() {
            if !robots.is_stale() {
                return Some(Arc::clone(robots));
            }
            debug!("robots.txt for {} is stale, refetching", host);
        }

        let robots = Arc::new(CachedRobots::new(self.fetch(url, &host).await));
        if let Some(delay) = robots.content.crawl_delay_duration(&self.agent) {
            info!("{} requests a crawl-delay of {:?}", host, delay);
            self.limiter.set_crawl_delay(&host, delay);
        }

        *cached = Some(Arc::clone(&robots));
        Some(robots)
    }

    async fn fetch(&self, url: &Url, host: &str) -> ParsedRobots {
        let robots_url = match url.join("/robots.txt") {
            Ok(robots_url) => robots_url,
            Err(e) => {
                warn!("Cannot build robots.txt URL for {}: {}", host, e);
                return ParsedRobots::allow_all();
            }
        };

        let _permit = self.limiter.acquire(host).await;
        debug!("Fetching {}", robots_url);

        let response = match self.client.get(robots_url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}; allowing all", robots_url, e);
                return ParsedRobots::allow_all();
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) => ParsedRobots::from_content(&body),
                Err(e) => {
                    warn!("Failed to read {}: {}; allowing all", robots_url, e);
                    ParsedRobots::allow_all()
                }
            }
        } else if status.is_client_error() {
            debug!("No robots.txt at {} (HTTP {})", robots_url, status.as_u16());
            ParsedRobots::allow_all()
        } else {
            warn!(
                "robots.txt at {} answered HTTP {}; allowing all",
                robots_url,
                status.as_u16()
            );
            ParsedRobots::allow_all()
        }
    }

    /// Number of hosts with a cache entry
    pub(crate) fn len(&self) -> usize {
        self.hosts.len()
    }
}
