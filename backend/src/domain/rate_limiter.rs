//! Fixed-window rate limiting for export requests.
//!
//! One record per user holds a request count and the instant its window
//! expires. The limiter is an injectable service owned by the application
//! state, not a process-global, so tests can construct as many as they need
//! with whatever window they need.
//!
//! All state lives in memory. The periodic sweep only reclaims memory for
//! expired records; `check_limit` self-heals on its own via the expired-window
//! branch, so correctness never depends on the sweep having run.

use shared::RateLimitStats;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct RateLimitRecord {
    count: u32,
    window_reset_at: Instant,
}

/// Result of one `check_limit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Seconds until the window resets; set only when denied
    pub retry_after_secs: Option<u64>,
}

/// Per-user fixed-window request limiter.
pub struct RateLimiter {
    records: Mutex<HashMap<String, RateLimitRecord>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Record one request attempt for `user_id` and decide whether it may
    /// proceed.
    ///
    /// The whole increment-or-create runs under the map lock, so two
    /// concurrent requests from the same user can never both claim the last
    /// slot in a window.
    pub fn check_limit(&self, user_id: &str) -> RateLimitDecision {
        self.check_limit_at(user_id, Instant::now())
    }

    fn check_limit_at(&self, user_id: &str, now: Instant) -> RateLimitDecision {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| RateLimitRecord {
                count: 0,
                window_reset_at: now + self.window,
            });

        // A lapsed window behaves exactly like a fresh record.
        if now > record.window_reset_at {
            record.count = 0;
            record.window_reset_at = now + self.window;
        }

        if record.count < self.max_requests {
            record.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: self.max_requests - record.count,
                retry_after_secs: None,
            }
        } else {
            let until_reset = record.window_reset_at.saturating_duration_since(now);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: Some(secs_ceil(until_reset)),
            }
        }
    }

    /// Drop a user's record immediately (administrative override).
    pub fn reset(&self, user_id: &str) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(user_id);
    }

    /// Remove expired records. Returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, record| now <= record.window_reset_at);
        before - records.len()
    }

    /// Counts for the operator stats endpoint.
    pub fn stats(&self) -> RateLimitStats {
        self.stats_at(Instant::now())
    }

    fn stats_at(&self, now: Instant) -> RateLimitStats {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let active_users = records
            .values()
            .filter(|record| record.window_reset_at >= now)
            .count();
        RateLimitStats {
            total_users: records.len(),
            active_users,
        }
    }
}

fn secs_ceil(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
