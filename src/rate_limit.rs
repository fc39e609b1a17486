use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::model::Ms;
use crate::observability::RATE_LIMITED_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// Until the oldest request in the window ages out.
    pub retry_after_ms: Ms,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "too many requests, retry in {} ms", self.retry_after_ms)
    }
}

impl std::error::Error for RateLimited {}

/// Sliding-log limiter: at most `quota` admitted requests per source address
/// in any `window_ms`. Excess requests are refused immediately and are not
/// counted.
pub struct RateLimiter {
    quota: usize,
    window_ms: Ms,
    clock: Arc<dyn Clock>,
    log: DashMap<IpAddr, VecDeque<Ms>>,
}

impl RateLimiter {
    pub fn new(quota: usize, window_ms: Ms, clock: Arc<dyn Clock>) -> Self {
        Self {
            quota,
            window_ms,
            clock,
            log: DashMap::new(),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), RateLimited> {
        let now = self.clock.now_ms();
        let mut entry = self.log.entry(ip).or_default();
        let times = entry.value_mut();
        while times.front().is_some_and(|&t| now - t >= self.window_ms) {
            times.pop_front();
        }
        if times.len() < self.quota {
            times.push_back(now);
            return Ok(());
        }
        let oldest = times.front().copied().unwrap_or(now);
        metrics::counter!(RATE_LIMITED_TOTAL).increment(1);
        Err(RateLimited {
            retry_after_ms: (oldest + self.window_ms - now).max(1),
        })
    }

    /// Forget addresses with nothing left in the window.
    pub fn prune(&self) {
        let now = self.clock.now_ms();
        self.log
            .retain(|_, times| times.back().is_some_and(|&t| now - t < self.window_ms));
    }

    pub fn tracked_addresses(&self) -> usize {
        self.log.len()
    }
}
