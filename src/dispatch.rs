//! Concurrent batch fetching with a per-domain rate limiter.
//!
//! [`Dispatcher::fetch_many`] fetches a list of URLs with at most
//! `max_session_permit` requests in flight and returns one [`DispatchResult`]
//! per URL, in input order. Every request first waits on the [`RateLimiter`],
//! which spaces requests to the same host and backs off when the host answers
//! with a rate-limit status.
//!
//! # Backoff
//!
//! ```text
//! first request to a host:  no wait, delay = uniform(base_delay)
//! 429 / 503:                delay = min(delay * 2 * uniform(0.75, 1.25), max_delay), retry
//! success / other status:   delay = max(uniform(base_delay), delay * 0.75)
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetcher::{FetchDirective, FetchError, FetchedPage, PageFetcher};
use crate::utils::secs;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Range in seconds the per-host delay is drawn from.
    pub base_delay: (f64, f64),
    /// Upper bound in seconds for the per-host delay.
    pub max_delay: f64,
    /// Retries of one request after a rate-limit status.
    pub max_retries: usize,
    pub rate_limit_codes: Vec<u16>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: (0.1, 0.2),
            max_delay: 15.0,
            max_retries: 5,
            rate_limit_codes: vec![429, 503],
        }
    }
}

#[derive(Debug)]
struct DomainState {
    next_slot: Instant,
    current_delay: Duration,
    fail_count: usize,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_rate_limited(&self, status: u16) -> bool {
        self.config.rate_limit_codes.contains(&status)
    }

    fn base_delay(&self) -> Duration {
        let (a, b) = self.config.base_delay;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let value = if hi > lo && lo.is_finite() && hi.is_finite() {
            rng().random_range(lo..=hi)
        } else {
            lo
        };
        secs(value)
    }

    fn max_delay(&self) -> Duration {
        secs(self.config.max_delay)
    }

    /// Sleep until the host of `url` may be hit again, then reserve the slot.
    ///
    /// The lock is released before sleeping so other hosts are not held up.
    pub async fn wait_if_needed(&self, url: &str) {
        let domain = domain_of(url);
        let slot = {
            let mut domains = self.domains.lock().await;
            let now = Instant::now();
            match domains.entry(domain.clone()) {
                Entry::Vacant(vacant) => {
                    let current_delay = self.base_delay();
                    vacant.insert(DomainState {
                        next_slot: now + current_delay,
                        current_delay,
                        fail_count: 0,
                    });
                    now
                }
                Entry::Occupied(mut occupied) => {
                    let state = occupied.get_mut();
                    let slot = state.next_slot.max(now);
                    state.next_slot = slot + state.current_delay;
                    slot
                }
            }
        };
        if slot > Instant::now() {
            debug!(%domain, wait_ms = (slot - Instant::now()).as_millis() as u64, "Rate limiting");
            sleep_until(slot).await;
        }
    }

    /// Adjust the host's delay after a response.
    ///
    /// Returns `false` once a rate-limited host has used up its retries.
    pub async fn update_delay(&self, url: &str, status: Option<u16>) -> bool {
        let domain = domain_of(url);
        let mut domains = self.domains.lock().await;
        let state = domains.entry(domain.clone()).or_insert_with(|| DomainState {
            next_slot: Instant::now(),
            current_delay: self.base_delay(),
            fail_count: 0,
        });

        if status.is_some_and(|s| self.is_rate_limited(s)) {
            state.fail_count += 1;
            if state.fail_count > self.config.max_retries {
                return false;
            }
            let factor = 2.0 * rng().random_range(0.75..=1.25);
            state.current_delay = state.current_delay.mul_f64(factor).min(self.max_delay());
            warn!(
                %domain,
                fails = state.fail_count,
                delay_ms = state.current_delay.as_millis() as u64,
                "Host is rate limiting; backing off"
            );
        } else {
            state.current_delay = self.base_delay().max(state.current_delay.mul_f64(0.75));
            state.fail_count = 0;
        }
        true
    }
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Requests in flight at once.
    pub max_session_permit: usize,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_session_permit: 30,
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

/// Outcome for one URL of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub url: String,
    pub result: Result<FetchedPage, FetchError>,
    /// Fetch attempts made, retries included.
    pub attempts: usize,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Dispatcher<'a, F> {
    fetcher: &'a F,
    limiter: RateLimiter,
    max_session_permit: usize,
}

impl<'a, F: PageFetcher> Dispatcher<'a, F> {
    pub fn new(fetcher: &'a F, config: DispatcherConfig) -> Self {
        Self {
            fetcher,
            limiter: RateLimiter::new(config.rate_limiter),
            max_session_permit: config.max_session_permit.max(1),
        }
    }

    /// Fetch every URL with `directive`. Results keep the order of `urls`.
    #[instrument(level = "info", skip_all, fields(count = urls.len()))]
    pub async fn fetch_many(&self, urls: &[String], directive: &FetchDirective) -> Vec<DispatchResult> {
        info!(permits = self.max_session_permit, "Dispatching fetches");
        let results: Vec<DispatchResult> = stream::iter(urls)
            .map(|url| self.fetch_one(url, directive))
            .buffered(self.max_session_permit)
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            total = results.len(),
            succeeded = results.len() - failed,
            failed,
            "Dispatch finished"
        );
        results
    }

    async fn fetch_one(&self, url: &str, directive: &FetchDirective) -> DispatchResult {
        let mut attempts = 0usize;
        loop {
            self.limiter.wait_if_needed(url).await;
            attempts += 1;
            let result = self.fetcher.fetch(url, directive).await;

            let status = match &result {
                Ok(page) => page.status,
                Err(e) => e.status(),
            };
            let may_retry = self.limiter.update_delay(url, status).await;

            match result {
                Err(e) if e.status().is_some_and(|s| self.limiter.is_rate_limited(s)) => {
                    if may_retry {
                        warn!(%url, attempts, error = %e, "Rate limited; retrying");
                        continue;
                    }
                    warn!(%url, attempts, error = %e, "Rate limited; giving up");
                    return DispatchResult {
                        url: url.to_string(),
                        result: Err(e),
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(%url, error = %e, "Fetch failed");
                    return DispatchResult {
                        url: url.to_string(),
                        result: Err(e),
                        attempts,
                    };
                }
                Ok(page) => {
                    debug!(%url, attempts, "Fetched");
                    return DispatchResult {
                        url: url.to_string(),
                        result: Ok(page),
                        attempts,
                    };
                }
            }
        }
    }
}
