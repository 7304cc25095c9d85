//! Per-client fixed-window request limiter for `/api`.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Window length.
pub const WINDOW_MS: i64 = 60_000;
/// Requests allowed per client per window.
pub const MAX_REQUESTS: u32 = 60;
/// Period of the expired-record sweep.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(60_000);

/// Request count for one client in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Client key → record. Shared across request tasks behind a mutex.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::milliseconds(WINDOW_MS), MAX_REQUESTS)
    }
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one request from `key` now.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now())
    }

    /// Count one request from `key` at `now`. Check and update happen under one lock.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut records = self.records();
        if let Some(record) = records.get_mut(key).filter(|r| now <= r.reset_at) {
            if record.count >= self.max_requests {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: record.reset_at,
                };
            }
            record.count += 1;
            return RateLimitDecision {
                allowed: true,
                remaining: self.max_requests - record.count,
                reset_at: record.reset_at,
            };
        }
        let reset_at = now + self.window;
        records.insert(key.to_string(), RateLimitRecord { count: 1, reset_at });
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests.saturating_sub(1),
            reset_at,
        }
    }

    /// Drop records whose window ended before `now`. Returns how many were removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, r| now <= r.reset_at);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep expired records every `period` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: std::time::Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_at(Utc::now());
                if removed > 0 {
                    log::debug!("rate limiter swept {} expired record(s)", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn sixty_allowed_then_rejected() {
        let rl = RateLimiter::default();
        let now = t0();
        let mut last = u32::MAX;
        for _ in 0..60 {
            let d = rl.check_at("10.0.0.1", now);
            assert!(d.allowed);
            assert!(d.remaining < last);
            last = d.remaining;
        }
        assert_eq!(last, 0);
        let d = rl.check_at("10.0.0.1", now + Duration::seconds(1));
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_at, now + Duration::milliseconds(WINDOW_MS));
    }

    #[test]
    fn first_request_reports_max_minus_one() {
        let rl = RateLimiter::default();
        let d = rl.check_at("a", t0());
        assert_eq!(d.remaining, 59);
        assert_eq!(d.reset_at, t0() + Duration::milliseconds(WINDOW_MS));
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new(Duration::seconds(60), 1);
        assert!(rl.check_at("a", t0()).allowed);
        assert!(!rl.check_at("a", t0()).allowed);
        assert!(rl.check_at("b", t0()).allowed);
    }

    #[test]
    fn expired_window_starts_fresh() {
        let rl = RateLimiter::default();
        for _ in 0..61 {
            rl.check_at("a", t0());
        }
        let after = t0() + Duration::milliseconds(WINDOW_MS + 1);
        let d = rl.check_at("a", after);
        assert!(d.allowed);
        assert_eq!(d.remaining, 59);
        assert_eq!(d.reset_at, after + Duration::milliseconds(WINDOW_MS));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let rl = RateLimiter::default();
        rl.check_at("old", t0());
        rl.check_at("new", t0() + Duration::seconds(50));
        assert_eq!(rl.len(), 2);
        let removed = rl.sweep_at(t0() + Duration::milliseconds(WINDOW_MS + 1));
        assert_eq!(removed, 1);
        assert_eq!(rl.len(), 1);
        assert!(rl.check_at("new", t0() + Duration::seconds(61)).remaining < 59);
    }

    #[tokio::test]
    async fn sweeper_task_clears_expired_records() {
        let rl = Arc::new(RateLimiter::new(Duration::milliseconds(10), 5));
        rl.check("one-shot");
        assert!(!rl.is_empty());
        let handle = rl.spawn_sweeper(std::time::Duration::from_millis(30));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(rl.is_empty());
        handle.abort();
    }
}
