//! Per-host rate limiting
//!
//! Every host gets its own slot in a `DashMap`: an async gate that
//! serializes acquisitions for that host, and the host's [`HostState`].
//! Callers for different hosts never wait on each other.

use crate::config::RateLimitConfig;
use crate::state::{HostState, MAX_CRAWL_DELAY};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HostSlot {
    /// Held across the wait so grants for one host happen one at a time
    gate: tokio::sync::Mutex<()>,
    state: Mutex<HostState>,
}

impl HostSlot {
    fn state(&self) -> MutexGuard<'_, HostState> {
        // HostState is plain data; a panic mid-update cannot break it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Permission to send one request to a host
///
/// Dropping the permit marks the request as finished.
#[derive(Debug)]
pub struct HostPermit {
    slot: Arc<HostSlot>,
    host: String,
    granted_at: Instant,
}

impl HostPermit {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// When the request was allowed to start
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        self.slot.state().release();
    }
}

/// Enforces the minimum interval and throttling backoff per host
#[derive(Debug)]
pub struct RateLimiter {
    hosts: DashMap<String, Arc<HostSlot>>,
    min_interval: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            hosts: DashMap::new(),
            min_interval: Duration::from_millis(config.min_interval_ms),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        // Clone out of the map so no shard lock is held across an await
        if let Some(slot) = self.hosts.get(host) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.hosts.entry(host.to_string()).or_default().value())
    }

    /// Waits until a request to `host` is allowed, then grants it
    ///
    /// The wait covers both the minimum interval since the last grant (or
    /// the robots.txt crawl-delay if larger) and any throttling backoff.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let slot = self.slot(host);
        let _gate = slot.gate.lock().await;

        loop {
            let (wait, backing_off) = {
                let state = slot.state();
                let now = Instant::now();
                (
                    state.time_until_next_request(self.min_interval, now),
                    state.is_backing_off(now),
                )
            };

            match wait {
                Some(wait) if backing_off => {
                    debug!("{} is backing off, waiting {:?}", host, wait);
                    tokio::time::sleep(wait).await;
                }
                Some(wait) => {
                    debug!("Waiting {:?} before next request to {}", wait, host);
                    tokio::time::sleep(wait).await;
                }
                None => break,
            }
        }

        let granted_at = Instant::now();
        slot.state().record_request(granted_at);

        HostPermit {
            slot: Arc::clone(&slot),
            host: host.to_string(),
            granted_at,
        }
    }

    /// Extends the backoff of `host` after an HTTP 429 or 503
    ///
    /// Returns the backoff applied.
    pub fn report_throttled(&self, host: &str, retry_after: Option<Duration>) -> Duration {
        let slot = self.slot(host);
        let mut state = slot.state();
        let delay = state.record_throttle(
            Instant::now(),
            self.backoff_base,
            self.backoff_max,
            retry_after,
        );
        warn!(
            "Host {} is throttling (x{}), backing off for {:?}",
            host, state.throttle_count, delay
        );
        delay
    }

    /// Resets the consecutive throttle counter of `host`
    pub fn report_success(&self, host: &str) {
        if let Some(slot) = self.hosts.get(host) {
            slot.state().reset_throttle();
        }
    }

    /// Raises the interval of `host` to its robots.txt crawl-delay
    ///
    /// Delays above [`MAX_CRAWL_DELAY`] are clamped.
    pub fn set_crawl_delay(&self, host: &str, delay: Duration) {
        let delay = if delay > MAX_CRAWL_DELAY {
            warn!(
                "Crawl-delay of {:?} for {} is too long, using {:?}",
                delay, host, MAX_CRAWL_DELAY
            );
            MAX_CRAWL_DELAY
        } else {
            delay
        };
        let slot = self.slot(host);
        slot.state().crawl_delay = Some(delay);
        debug!("Crawl-delay for {} set to {:?}", host, delay);
    }

    /// Snapshot of the state of `host`, if it was ever seen
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        self.hosts.get(host).map(|slot| slot.state().clone())
    }

    /// Number of hosts seen so far
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}
