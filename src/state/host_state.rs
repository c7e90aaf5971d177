use std::time::{Duration, Instant};

/// Longest robots.txt crawl-delay honored between two requests
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// `at + delay`, clamped instead of overflowing for absurd delays
fn instant_after(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(MAX_CRAWL_DELAY))
        .unwrap_or(at)
}

/// Tracks the politeness state of one host during crawling
///
/// The rate limiter owns one of these per host. All time arithmetic takes
/// `now` as an argument so the rules can be tested without sleeping.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// When the last request to this host was granted
    pub last_request_at: Option<Instant>,

    /// Requests granted and not yet released
    pub in_flight_count: u32,

    /// No request may be granted before this instant (set on throttling)
    pub backoff_until: Option<Instant>,

    /// Consecutive throttling responses since the last success
    pub throttle_count: u32,

    /// Total requests granted to this host
    pub request_count: u64,

    /// Crawl-delay announced by the host's robots.txt, if any
    pub crawl_delay: Option<Duration>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The interval actually enforced: the configured minimum, or the
    /// robots.txt crawl-delay (at most [`MAX_CRAWL_DELAY`]) if that is larger
    pub fn effective_interval(&self, min_interval: Duration) -> Duration {
        match self.crawl_delay {
            Some(delay) => delay.min(MAX_CRAWL_DELAY).max(min_interval),
            None => min_interval,
        }
    }

    /// Earliest instant the next request may be granted, or `None` if
    /// nothing constrains it
    pub fn next_allowed_at(&self, min_interval: Duration) -> Option<Instant> {
        let after_interval = self
            .last_request_at
            .map(|last| instant_after(last, self.effective_interval(min_interval)));

        match (after_interval, self.backoff_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left until a request can be made, or `None` if one can be made now
    pub fn time_until_next_request(&self, min_interval: Duration, now: Instant) -> Option<Duration> {
        self.next_allowed_at(min_interval)
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    /// Records that a request was granted at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.last_request_at = Some(now);
        self.request_count += 1;
        self.in_flight_count += 1;
    }

    /// Records that a granted request finished
    pub fn release(&mut self) {
        self.in_flight_count = self.in_flight_count.saturating_sub(1);
    }

    /// Extends the backoff window after a throttling response
    ///
    /// The delay doubles with every consecutive throttle (`base * 2^(n-1)`),
    /// is capped at `max`, and is never shorter than the server's
    /// `Retry-After`, which is itself honored up to `max`. Returns the delay
    /// applied.
    pub fn record_throttle(
        &mut self,
        now: Instant,
        base: Duration,
        max: Duration,
        retry_after: Option<Duration>,
    ) -> Duration {
        self.throttle_count = self.throttle_count.saturating_add(1);

        let exponent = (self.throttle_count - 1).min(31);
        let mut delay = base.saturating_mul(1u32 << exponent).min(max);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after.min(max));
        }

        let until = instant_after(now, delay);
        self.backoff_until = Some(match self.backoff_until {
            Some(existing) => existing.max(until),
            None => until,
        });

        delay
    }

    /// Clears the consecutive throttle counter after a successful response
    pub fn reset_throttle(&mut self) {
        self.throttle_count = 0;
    }

    /// Returns true while the host's backoff window is open
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1000);

    #[test]
    fn test_new_host_state() {
        let state = HostState::new();
        assert_eq!(state.request_count, 0);
        assert_eq!(state.in_flight_count, 0);
        assert!(state.last_request_at.is_none());
        assert!(state.backoff_until.is_none());
        assert!(state.time_until_next_request(INTERVAL, Instant::now()).is_none());
    }

    #[test]
    fn test_cannot_request_too_soon() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_request(now);

        assert!(state.time_until_next_request(INTERVAL, now).is_some());
        assert!(state
            .time_until_next_request(INTERVAL, now + Duration::from_millis(500))
            .is_some());
        assert!(state
            .time_until_next_request(INTERVAL, now + Duration::from_millis(1000))
            .is_none());
    }

    #[test]
    fn test_time_until_next_request() {
        let mut state = HostState::new();
        let now = Instant::now();
        assert!(state.time_until_next_request(INTERVAL, now).is_none());

        state.record_request(now);
        assert_eq!(
            state.time_until_next_request(INTERVAL, now),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            state.time_until_next_request(INTERVAL, now + Duration::from_millis(300)),
            Some(Duration::from_millis(700))
        );
        assert!(state
            .time_until_next_request(INTERVAL, now + Duration::from_millis(1100))
            .is_none());
    }

    #[test]
    fn test_crawl_delay_raises_interval() {
        let mut state = HostState::new();
        state.crawl_delay = Some(Duration::from_secs(3));
        assert_eq!(state.effective_interval(INTERVAL), Duration::from_secs(3));

        state.crawl_delay = Some(Duration::from_millis(10));
        assert_eq!(state.effective_interval(INTERVAL), INTERVAL);
    }

    #[test]
    fn test_record_request_and_release() {
        let mut state = HostState::new();
        let now = Instant::now();

        state.record_request(now);
        state.record_request(now);
        assert_eq!(state.request_count, 2);
        assert_eq!(state.in_flight_count, 2);
        assert_eq!(state.last_request_at, Some(now));

        state.release();
        state.release();
        state.release();
        assert_eq!(state.in_flight_count, 0);
        assert_eq!(state.request_count, 2);
    }

    #[test]
    fn test_throttle_backoff_doubles_and_caps() {
        let mut state = HostState::new();
        let now = Instant::now();
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(350);

        assert_eq!(state.record_throttle(now, base, max, None), Duration::from_millis(100));
        assert_eq!(state.record_throttle(now, base, max, None), Duration::from_millis(200));
        assert_eq!(state.record_throttle(now, base, max, None), Duration::from_millis(350));
        assert_eq!(state.throttle_count, 3);
        assert!(state.is_backing_off(now));
        assert_eq!(state.backoff_until, Some(now + Duration::from_millis(350)));
    }

    #[test]
    fn test_throttle_honors_retry_after() {
        let mut state = HostState::new();
        let now = Instant::now();

        let delay = state.record_throttle(
            now,
            Duration::from_millis(100),
            Duration::from_secs(10),
            Some(Duration::from_secs(5)),
        );
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(
            state.time_until_next_request(INTERVAL, now),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_backoff_window_never_shrinks() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_throttle(now, Duration::from_secs(10), Duration::from_secs(10), None);
        state.reset_throttle();
        state.record_throttle(now, Duration::from_millis(1), Duration::from_secs(10), None);

        assert_eq!(state.backoff_until, Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_reset_throttle() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_throttle(now, Duration::from_millis(100), Duration::from_secs(1), None);
        state.record_throttle(now, Duration::from_millis(100), Duration::from_secs(1), None);
        state.reset_throttle();
        assert_eq!(state.throttle_count, 0);

        let delay = state.record_throttle(now, Duration::from_millis(100), Duration::from_secs(1), None);
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_and_interval_combined() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_request(now);
        state.record_throttle(now, Duration::from_millis(200), Duration::from_secs(1), None);

        // Interval (1000ms) dominates the shorter backoff
        assert_eq!(state.next_allowed_at(INTERVAL), Some(now + INTERVAL));
    }

    #[test]
    fn test_huge_retry_after_is_capped() {
        let mut state = HostState::new();
        let now = Instant::now();
        let max = Duration::from_secs(60);

        let delay = state.record_throttle(
            now,
            Duration::from_millis(100),
            max,
            Some(Duration::from_secs(u64::MAX)),
        );
        assert_eq!(delay, max);
        assert_eq!(state.backoff_until, Some(now + max));
    }

    #[test]
    fn test_huge_crawl_delay_is_capped() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.crawl_delay = Some(Duration::from_secs(u64::MAX));
        state.record_request(now);

        assert_eq!(state.effective_interval(INTERVAL), MAX_CRAWL_DELAY);
        assert_eq!(
            state.time_until_next_request(INTERVAL, now),
            Some(MAX_CRAWL_DELAY)
        );
    }

    #[test]
    fn test_instant_after_never_overflows() {
        let now = Instant::now();
        assert_eq!(instant_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));
        assert!(instant_after(now, Duration::MAX) >= now);
    }
}
