//! Per-site request pacing.
//!
//! Every network operation of a run (collection pages, issue and page
//! documents, artifacts, text services) passes through one shared
//! [`RateLimiter`]. Requests are grouped by *site*, the registrable part of
//! the host, so that `www.loc.gov` and `tile.loc.gov` share a budget.
//!
//! Three rules apply per site:
//! - a minimum spacing between consecutive requests (chosen per call, so
//!   light scan requests and heavy artifact downloads can differ);
//! - a sliding burst ceiling (at most N requests per window);
//! - a hard block until a server-mandated Retry-After has elapsed.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use newsarchive_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(1));
//! limiter.acquire("https://www.loc.gov/collections/").await;
//! // Same site, waits out the spacing first.
//! limiter.acquire_spaced("https://tile.loc.gov/page.pdf", Duration::from_secs(4)).await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{
    BURST_LIMIT, BURST_WINDOW, CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER,
};

/// Shared per-site rate limiter. Wrap in `Arc` and hand to every component.
#[derive(Debug)]
pub struct RateLimiter {
    /// Spacing used by [`acquire`](Self::acquire).
    default_delay: Duration,
    disabled: bool,
    burst_limit: usize,
    burst_window: Duration,
    /// Arc so the `DashMap` shard lock can be released before awaiting.
    sites: DashMap<String, Arc<SiteState>>,
}

#[derive(Debug, Default)]
struct SiteState {
    timing: Mutex<SiteTiming>,
    /// Set from Retry-After; synchronous so it can be recorded without awaiting.
    blocked_until: std::sync::Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct SiteTiming {
    /// `None` until the first request (first request is immediate).
    last_request: Option<Instant>,
    /// Start times of requests inside the burst window, oldest first.
    recent: VecDeque<Instant>,
}

impl SiteState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }

    fn blocked_until(&self) -> Option<Instant> {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RateLimiter {
    /// Creates a limiter with the given default spacing and the archive's burst ceiling.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = default_delay.as_millis()))]
    pub fn new(default_delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_delay,
            disabled: false,
            burst_limit: BURST_LIMIT,
            burst_window: BURST_WINDOW,
            sites: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits. Used by tests and local mirrors.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_delay: Duration::ZERO,
            disabled: true,
            burst_limit: usize::MAX,
            burst_window: Duration::ZERO,
            sites: DashMap::new(),
        }
    }

    /// Overrides the burst ceiling (`limit` requests per `window`, `limit` floored at 1).
    #[must_use]
    pub fn with_burst_ceiling(mut self, limit: usize, window: Duration) -> Self {
        self.burst_limit = limit.max(1);
        self.burst_window = window;
        self
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Waits for the default spacing on the URL's site.
    pub async fn acquire(&self, url: &str) {
        self.acquire_spaced(url, self.default_delay).await;
    }

    /// Waits until a request to the URL's site is allowed, then claims the slot.
    #[instrument(skip(self), fields(site))]
    pub async fn acquire_spaced(&self, url: &str, spacing: Duration) {
        if self.disabled {
            return;
        }

        let site = extract_site(url);
        tracing::Span::current().record("site", &site);

        let state = self
            .sites
            .entry(site.clone())
            .or_insert_with(|| Arc::new(SiteState::default()))
            .clone();

        // Held across the sleep so concurrent callers queue behind each other.
        let mut timing = state.timing.lock().await;
        let now = Instant::now();

        let mut ready_at = now;
        if let Some(last) = timing.last_request {
            ready_at = ready_at.max(last + spacing);
        }
        if let Some(blocked) = state.blocked_until() {
            ready_at = ready_at.max(blocked);
        }
        ready_at = self.respect_burst_ceiling(&mut timing.recent, ready_at);

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                site = %site,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative - delay < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    site = %site,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "pacing has added significant wait time for this site"
                );
            }
            tokio::time::sleep_until(ready_at).await;
        }

        let stamp = Instant::now();
        timing.last_request = Some(stamp);
        timing.recent.push_back(stamp);
    }

    /// Pushes `ready_at` past the burst window when the site is at its ceiling.
    fn respect_burst_ceiling(&self, recent: &mut VecDeque<Instant>, mut ready_at: Instant) -> Instant {
        let window = self.burst_window;
        let prune = |recent: &mut VecDeque<Instant>, at: Instant| {
            while recent.front().is_some_and(|&start| start + window <= at) {
                recent.pop_front();
            }
        };

        prune(recent, ready_at);
        while recent.len() >= self.burst_limit {
            let Some(&oldest) = recent.front() else {
                break;
            };
            ready_at = ready_at.max(oldest + window);
            prune(recent, ready_at);
        }
        ready_at
    }

    /// Records a server-mandated pause (from Retry-After): the whole site is
    /// blocked until it has elapsed.
    #[instrument(skip(self), fields(site))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let site = extract_site(url);
        tracing::Span::current().record("site", &site);

        let state = self
            .sites
            .entry(site.clone())
            .or_insert_with(|| Arc::new(SiteState::default()))
            .clone();
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        {
            let mut blocked = state
                .blocked_until
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *blocked = Some(blocked.map_or(until, |current| current.max(until)));
        }
        let cumulative = state.add_cumulative_delay(delay);

        warn!(
            site = %site,
            delay_secs = delay.as_secs(),
            cumulative_secs = cumulative.as_secs(),
            "server requested a pause; blocking site"
        );
    }
}

/// Extracts the rate-limit site from a URL.
///
/// Domain names collapse to their last two labels; IP addresses and single
/// label hosts are used as-is. Malformed URLs map to `"unknown"` so they are
/// still paced.
///
/// ```
/// use newsarchive_core::download::extract_site;
///
/// assert_eq!(extract_site("https://www.loc.gov/item/x/"), "loc.gov");
/// assert_eq!(extract_site("https://tile.LOC.gov/a.pdf"), "loc.gov");
/// assert_eq!(extract_site("http://127.0.0.1:8080/x"), "127.0.0.1");
/// assert_eq!(extract_site("http://localhost:9000/x"), "localhost");
/// assert_eq!(extract_site("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_site(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return "unknown".to_string();
    };
    match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
            if labels.len() <= 2 {
                domain
            } else {
                labels[labels.len() - 2..].join(".")
            }
        }
        Some(host) => host.to_string(),
        None => "unknown".to_string(),
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-dates (RFC 7231). Values above one hour
/// are capped; dates in the past yield zero; anything else is `None`.
///
/// ```
/// use std::time::Duration;
/// use newsarchive_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
