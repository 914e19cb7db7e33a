use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Sliding-window limiter keyed by error.
///
/// Each key keeps the timestamps of its recent attempts; entries older than
/// the window are pruned lazily whenever the key is consulted.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    history: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_hour(max_per_hour: usize) -> Self {
        Self::new(max_per_hour, Duration::hours(1))
    }

    pub fn max_per_window(&self) -> usize {
        self.max_per_window
    }

    /// Record an attempt at `now` unless the key is already at its limit.
    /// With `force`, the attempt is always recorded and allowed.
    pub fn try_acquire_at(&self, key: &str, now: DateTime<Utc>, force: bool) -> bool {
        let mut history = self.history.lock();
        let entries = history.entry(key.to_string()).or_default();
        let horizon = now - self.window;
        while entries.front().is_some_and(|t| *t <= horizon) {
            entries.pop_front();
        }

        if entries.len() >= self.max_per_window && !force {
            return false;
        }
        entries.push_back(now);
        true
    }

    pub fn try_acquire(&self, key: &str, force: bool) -> bool {
        self.try_acquire_at(key, Utc::now(), force)
    }

    /// Attempts currently counted against `key` as of `now`.
    pub fn recent_count_at(&self, key: &str, now: DateTime<Utc>) -> usize {
        let horizon = now - self.window;
        self.history
            .lock()
            .get(key)
            .map(|entries| entries.iter().filter(|t| **t > horizon).count())
            .unwrap_or(0)
    }
}
