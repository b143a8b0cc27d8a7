use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sliding-window request counter, keyed by repo name.
#[derive(Debug, Default)]
pub struct RateLimiter {
    requests: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` already made `max` requests inside the window.
    /// Allowed requests are counted; rejected ones are not.
    pub fn check_rate_limit(&mut self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_at(key, max, Duration::from_secs(window_secs), Instant::now())
    }

    fn check_at(&mut self, key: &str, max: usize, window: Duration, now: Instant) -> bool {
        let timestamps = self.requests.entry(key.to_string()).or_default();
        timestamps.retain(|&t| now.duration_since(t) < window);

        if timestamps.len() < max {
            timestamps.push(now);
            false
        } else {
            true
        }
    }
}
