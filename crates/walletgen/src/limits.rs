//! Per-user sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::jobs::lock;

/// Allows `max_requests` per user within any `window`.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// `per_minute` requests per 60 seconds.
    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, Duration::from_secs(60))
    }

    /// Records a request, or returns how long until the next one is allowed.
    pub fn check(&self, user: i64) -> Result<(), Duration> {
        self.check_at(user, Instant::now())
    }

    pub(crate) fn check_at(&self, user: i64, now: Instant) -> Result<(), Duration> {
        let mut hits = lock(&self.hits, "rate limiter");
        // Expired hits go for every user; users left with none are forgotten.
        hits.retain(|_, queue| {
            while let Some(&oldest) = queue.front() {
                if now.saturating_duration_since(oldest) >= self.window {
                    queue.pop_front();
                } else {
                    break;
                }
            }
            !queue.is_empty()
        });

        let queue = hits.entry(user).or_default();
        if queue.len() >= self.max_requests {
            let oldest = queue.front().copied().unwrap_or(now);
            let retry = self.window.saturating_sub(now.saturating_duration_since(oldest));
            return Err(retry);
        }

        queue.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    /// Users with at least one hit inside the window.
    pub(crate) fn tracked_users(&self) -> usize {
        lock(&self.hits, "rate limiter").len()
    }
}
