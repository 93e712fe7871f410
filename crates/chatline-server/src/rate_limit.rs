//! Per-IP request rate limiting for the HTTP API.
//!
//! A sliding window: each address may make `max_requests` requests in any
//! `window`. Rejected requests do not count against the window.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed.
    pub used: usize,
    /// Requests allowed per window.
    pub limit: usize,
}

impl RateDecision {
    /// Usage string for the `X-RateLimit-Usage` header, e.g. `3/60`.
    #[must_use]
    pub fn usage(&self) -> String {
        format!("{}/{}", self.used, self.limit)
    }
}

/// Sliding-window rate limiter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: DashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: DashMap::new(),
        }
    }

    /// Length of the window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `ip` if it fits in the window.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        let now = Instant::now();
        let mut times = self.requests.entry(ip).or_default();
        self.expire(&mut times, now);

        let allowed = times.len() < self.max_requests;
        if allowed {
            times.push_back(now);
        }

        RateDecision {
            allowed,
            used: times.len(),
            limit: self.max_requests,
        }
    }

    /// Requests counted for `ip` in the current window.
    #[must_use]
    pub fn usage(&self, ip: IpAddr) -> usize {
        let now = Instant::now();
        self.requests
            .get(&ip)
            .map(|times| times.iter().filter(|t| now.duration_since(**t) < self.window).count())
            .unwrap_or(0)
    }

    /// Forget addresses with no requests in the current window.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, times| {
            times
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
        before - self.requests.len()
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.requests.len()
    }

    fn expire(&self, times: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = times.front() {
            if now.duration_since(*oldest) >= self.window {
                times.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ALICE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const BOB: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[tokio::test(start_paused = true)]
    async fn test_limit_per_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        for expected in 1..=3 {
            let decision = limiter.check(ALICE);
            assert!(decision.allowed);
            assert_eq!(decision.used, expected);
        }

        let rejected = limiter.check(ALICE);
        assert!(!rejected.allowed);
        assert_eq!(rejected.usage(), "3/3");

        // Other addresses have their own window.
        assert!(limiter.check(BOB).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        limiter.check(ALICE);
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check(ALICE);
        assert!(!limiter.check(ALICE).allowed);

        // The first request falls out of the window; the second does not.
        tokio::time::advance(Duration::from_secs(30)).await;
        let decision = limiter.check(ALICE);
        assert!(decision.allowed);
        assert_eq!(decision.used, 2);
        assert_eq!(limiter.usage(ALICE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.check(ALICE).allowed);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!limiter.check(ALICE).allowed);
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(ALICE).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        limiter.check(ALICE);
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check(BOB);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.prune_idle(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.usage(ALICE), 0);
        assert_eq!(limiter.usage(BOB), 1);
    }
}
