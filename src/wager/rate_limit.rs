//! Entry creation throttling
//!
//! Sliding window per client wallet. The shipped limiter keeps its windows
//! in process memory, so separate engine instances each admit their own
//! quota; a shared store behind [`RateLimiter`] lifts that.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Throttled { retry_after: Duration },
}

pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` and decide whether it is admitted
    fn check(&self, key: &str) -> RateDecision;
}

pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.window_secs))
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut hits = self.hits.entry(key.to_string()).or_default();

        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.max_requests {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return RateDecision::Throttled {
                // Retry-After has whole-second resolution
                retry_after: Duration::from_secs(retry_after.as_secs().max(1)),
            };
        }

        hits.push_back(now);
        RateDecision::Allowed {
            remaining: self.max_requests - hits.len(),
        }
    }

    /// Drop wallets with no hits inside the window
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.hits.retain(|_, hits| {
            hits.back()
                .map(|last| now.saturating_duration_since(*last) < window)
                .unwrap_or(false)
        });
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }
}
