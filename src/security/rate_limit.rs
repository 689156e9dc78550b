//! Sliding-window rate limiting.
//!
//! Admission control keyed by `(user_id, operation)`. Each key holds the
//! timestamps of its admitted requests; a request is admitted when fewer
//! than `max_requests` of them fall inside the trailing window. Rejected
//! requests are never recorded, so a client hammering a full window does
//! not extend its own lockout.

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitSettings;
use crate::sweep::{SweepHandle, spawn_sweeper};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Limit for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Maximum admitted requests per window.
    pub max_requests: usize,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    /// Creates a rule.
    #[must_use]
    pub const fn new(max_requests: usize, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Requests still available in the current window.
    pub remaining: usize,
    /// Milliseconds until the oldest admitted request leaves the window.
    pub reset_in_ms: u64,
    /// Configured maximum.
    pub limit: usize,
}

type Window = Arc<Mutex<VecDeque<u64>>>;

/// Sliding-window rate limiter.
///
/// Cheap to share behind an `Arc`. Keys are locked individually, so
/// checks for different users never contend beyond the map lookup.
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Window>>,
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter using the system clock.
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, SystemClock::shared())
    }

    /// Creates a limiter with an explicit clock.
    #[must_use]
    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            settings,
            clock,
        }
    }

    /// Returns the configured settings.
    #[must_use]
    pub const fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Checks and, if admitted, records a request for `key`.
    pub fn check(&self, key: &str, rule: RateLimitRule) -> RateLimitResult {
        let window = self.window_for(key);
        let mut timestamps = window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now_ms();
        prune(&mut timestamps, now, rule.window_ms);

        let allowed = timestamps.len() < rule.max_requests;
        if allowed {
            timestamps.push_back(now);
        }
        summarize(&timestamps, now, rule, allowed)
    }

    /// Reports the state of `key` without recording anything.
    pub fn status(&self, key: &str, rule: RateLimitRule) -> RateLimitResult {
        let window = {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            windows.get(key).cloned()
        };
        let now = self.clock.now_ms();
        let Some(window) = window else {
            return summarize(&VecDeque::new(), now, rule, true);
        };
        let timestamps = window.lock().unwrap_or_else(PoisonError::into_inner);
        let cutoff = now.saturating_sub(rule.window_ms);
        let live: VecDeque<u64> = timestamps.iter().copied().filter(|t| *t > cutoff).collect();
        let allowed = live.len() < rule.max_requests;
        summarize(&live, now, rule, allowed)
    }

    /// Checks a request for a user and operation using the configured rule.
    pub fn check_rate_limit(&self, user_id: &str, operation: &str) -> RateLimitResult {
        let rule = self.settings.rule_for(operation);
        let result = self.check(&rate_key(user_id, operation), rule);
        if !result.allowed {
            warn!(
                user_id,
                operation,
                limit = result.limit,
                reset_in_ms = result.reset_in_ms,
                "Rate limit exceeded"
            );
            metrics::counter!("rate_limit_rejected_total", "operation" => operation.to_string())
                .increment(1);
        }
        result
    }

    /// Reports the configured-rule state for a user and operation.
    pub fn status_for(&self, user_id: &str, operation: &str) -> RateLimitResult {
        self.status(
            &rate_key(user_id, operation),
            self.settings.rule_for(operation),
        )
    }

    /// Checks a request and converts a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimitExceeded`] when the window is full.
    pub fn enforce(&self, user_id: &str, operation: &str) -> Result<RateLimitResult> {
        let result = self.check_rate_limit(user_id, operation);
        if result.allowed {
            Ok(result)
        } else {
            Err(Error::RateLimitExceeded {
                operation: operation.to_string(),
                retry_after_ms: result.reset_in_ms,
                limit: result.limit,
            })
        }
    }

    /// Removes keys idle for longer than the longest configured window.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let idle_after = self.settings.longest_window_ms();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, window| {
            // A window handed out to an in-flight check must stay in the map.
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let timestamps = window.lock().unwrap_or_else(PoisonError::into_inner);
            timestamps
                .back()
                .is_some_and(|last| now.saturating_sub(*last) <= idle_after)
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "Swept idle rate limit keys");
        }
        removed
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Starts the background idle-key sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_sweeper(self: &Arc<Self>) -> Result<SweepHandle> {
        spawn_sweeper(
            "teamrecall-rate-limit-sweeper",
            self.settings.sweep_interval,
            Arc::downgrade(self),
            |limiter: &Self| {
                limiter.sweep_idle();
            },
        )
    }

    fn window_for(&self, key: &str) -> Window {
        {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = windows.get(key) {
                return Arc::clone(window);
            }
        }
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(windows.entry(key.to_string()).or_default())
    }
}

/// Builds the limiter key for a user and operation.
#[must_use]
pub fn rate_key(user_id: &str, operation: &str) -> String {
    format!("{operation}:{user_id}")
}

fn prune(timestamps: &mut VecDeque<u64>, now: u64, window_ms: u64) {
    let cutoff = now.saturating_sub(window_ms);
    while timestamps.front().is_some_and(|t| *t <= cutoff) {
        timestamps.pop_front();
    }
}

fn summarize(
    timestamps: &VecDeque<u64>,
    now: u64,
    rule: RateLimitRule,
    allowed: bool,
) -> RateLimitResult {
    let reset_in_ms = timestamps
        .front()
        .map_or(0, |oldest| (oldest + rule.window_ms).saturating_sub(now));
    RateLimitResult {
        allowed,
        remaining: rule.max_requests.saturating_sub(timestamps.len()),
        reset_in_ms,
        limit: rule.max_requests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        let mut settings = RateLimitSettings::default();
        settings
            .operations
            .insert("team_query".to_string(), RateLimitRule::new(3, 1_000));
        RateLimiter::with_clock(settings, clock)
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = limiter(Arc::clone(&clock));
        for expected_remaining in [2, 1, 0] {
            let result = limiter.check_rate_limit("u1", "team_query");
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }
        let rejected = limiter.check_rate_limit("u1", "team_query");
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 3);
        assert_eq!(rejected.reset_in_ms, 1_000);
    }

    #[test]
    fn test_admits_again_after_window() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = limiter(Arc::clone(&clock));
        for _ in 0..3 {
            limiter.check_rate_limit("u1", "team_query");
        }
        clock.advance_ms(999);
        assert!(!limiter.check_rate_limit("u1", "team_query").allowed);
        clock.advance_ms(1);
        assert!(limiter.check_rate_limit("u1", "team_query").allowed);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Arc::clone(&clock));
        let rule = RateLimitRule::new(1, 100);
        assert!(limiter.check("k", rule).allowed);
        for _ in 0..10 {
            clock.advance_ms(5);
            assert!(!limiter.check("k", rule).allowed);
        }
        clock.set_ms(100);
        assert!(limiter.check("k", rule).allowed);
    }

    #[test]
    fn test_status_is_read_only() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock);
        let before = limiter.status_for("u1", "team_query");
        assert!(before.allowed);
        assert_eq!(before.remaining, 3);
        let _ = limiter.status_for("u1", "team_query");
        assert_eq!(limiter.tracked_keys(), 0);
        limiter.check_rate_limit("u1", "team_query");
        assert_eq!(limiter.status_for("u1", "team_query").remaining, 2);
        assert_eq!(limiter.status_for("u1", "team_query").remaining, 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock);
        for _ in 0..3 {
            limiter.check_rate_limit("u1", "team_query");
        }
        assert!(!limiter.check_rate_limit("u1", "team_query").allowed);
        assert!(limiter.check_rate_limit("u2", "team_query").allowed);
        assert!(limiter.check_rate_limit("u1", "research").allowed);
    }

    #[test]
    fn test_enforce_error() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock);
        for _ in 0..3 {
            assert!(limiter.enforce("u1", "team_query").is_ok());
        }
        let err = limiter.enforce("u1", "team_query");
        assert!(matches!(
            err,
            Err(Error::RateLimitExceeded { limit: 3, retry_after_ms: 1_000, .. })
        ));
    }

    #[test]
    fn test_sweep_idle() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Arc::clone(&clock));
        limiter.check_rate_limit("u1", "team_query");
        limiter.check_rate_limit("u2", "research");
        assert_eq!(limiter.tracked_keys(), 2);
        clock.advance_ms(limiter.settings().longest_window_ms() + 1);
        limiter.check_rate_limit("u3", "team_query");
        assert_eq!(limiter.sweep_idle(), 2);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_sweep_keeps_window_held_by_a_check() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Arc::clone(&clock));
        let key = rate_key("u1", "team_query");
        limiter.check_rate_limit("u1", "team_query");
        clock.advance_ms(limiter.settings().longest_window_ms() + 1);

        // A check that fetched the window before the sweep ran.
        let held = limiter.window_for(&key);
        assert_eq!(limiter.sweep_idle(), 0);
        assert!(Arc::ptr_eq(&held, &limiter.window_for(&key)));

        for _ in 0..3 {
            assert!(limiter.check_rate_limit("u1", "team_query").allowed);
        }
        assert!(!limiter.check_rate_limit("u1", "team_query").allowed);
        assert_eq!(held.lock().unwrap_or_else(PoisonError::into_inner).len(), 3);

        drop(held);
        clock.advance_ms(limiter.settings().longest_window_ms() + 1);
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
