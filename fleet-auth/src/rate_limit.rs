//! `RateLimit.Check(key, rule) → Allow | Deny` (spec §6), hand-rolled
//! per §4.13: no example repo in the retrieval pack depends on an
//! ecosystem rate-limiting crate. Shaped like
//! `hr-auth::sessions::SessionStore`'s own sliding state plus
//! `AuthService::start_cleanup_task`'s periodic sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A fixed `max` hits per rolling `window` per key.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub max: usize,
    pub window: Duration,
}

impl Rule {
    pub const fn new(max: usize, window: Duration) -> Self {
        Self { max, window }
    }
}

#[derive(Default)]
struct Inner {
    hits: HashMap<String, Vec<Instant>>,
}

/// Sliding-window rate limiter: `Mutex<HashMap<String, Vec<Instant>>>`,
/// one entry per key, pruned to the active window on every check and
/// swept wholesale by a background task.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn check(&self, key: &str, rule: Rule) -> Decision {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let hits = inner.hits.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < rule.window);

        if hits.len() >= rule.max {
            return Decision::Deny;
        }
        hits.push(now);
        Decision::Allow
    }

    /// Drops keys with no hits inside any plausible window, bounding
    /// memory for keys that stop being used. Mirrors
    /// `SessionStore::cleanup_expired`.
    pub fn sweep(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner
            .hits
            .retain(|_, hits| hits.last().is_some_and(|t| now.duration_since(*t) < max_idle));
    }

    /// Spawns the periodic sweep, matching
    /// `AuthService::start_cleanup_task`'s `tokio::spawn` + `interval` shape.
    pub fn start_cleanup_task(&self, period: Duration, max_idle: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                this.sweep(max_idle);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = RateLimiter::new();
        let rule = Rule::new(3, Duration::from_secs(60));
        assert_eq!(limiter.check("code-attempt:k1", rule), Decision::Allow);
        assert_eq!(limiter.check("code-attempt:k1", rule), Decision::Allow);
        assert_eq!(limiter.check("code-attempt:k1", rule), Decision::Allow);
        assert_eq!(limiter.check("code-attempt:k1", rule), Decision::Deny);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let rule = Rule::new(1, Duration::from_secs(60));
        assert_eq!(limiter.check("a", rule), Decision::Allow);
        assert_eq!(limiter.check("b", rule), Decision::Allow);
        assert_eq!(limiter.check("a", rule), Decision::Deny);
    }

    #[test]
    fn sweep_drops_only_idle_keys() {
        let limiter = RateLimiter::new();
        let rule = Rule::new(5, Duration::from_secs(60));
        limiter.check("fresh", rule);
        limiter.sweep(Duration::from_secs(0));
        // zero-duration idle window: even the just-hit key is stale by the time we check.
        assert_eq!(limiter.check("fresh", rule), Decision::Allow);
    }
}
