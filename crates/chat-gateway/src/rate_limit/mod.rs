//! Per-capability fixed-window rate limiting.

pub mod counter_store;

pub use counter_store::{CounterStore, InMemoryCounterStore, RateLimitEntry, WindowCount};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::{Config, MAX_RATE_LIMIT_WINDOW_SECONDS};
use crate::error::ApiError;
use crate::metrics;

/// A rate-limited action exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Image,
    Auth,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Image => "image",
            Capability::Auth => "auth",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Milliseconds until the window resets, never negative.
    pub fn retry_after_ms(&self) -> i64 {
        (self.reset_at - Utc::now()).num_milliseconds().max(0)
    }
}

pub struct RateLimiter {
    capability: Capability,
    ceiling: u32,
    window: Duration,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(
        capability: Capability,
        ceiling: u32,
        window: Duration,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self { capability, ceiling, window, store }
    }

    fn key(&self, identity: &str) -> String {
        format!("rate_limit:{}:{}", self.capability, identity)
    }

    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Utc::now())
    }

    pub fn check_at(&self, identity: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let counted = self
            .store
            .increment(&self.key(identity), self.ceiling, self.window, now);

        RateLimitDecision {
            allowed: counted.admitted,
            limit: self.ceiling,
            remaining: if counted.admitted {
                self.ceiling.saturating_sub(counted.count)
            } else {
                0
            },
            reset_at: counted.reset_at,
        }
    }

    /// Check and turn a denial into `ApiError::RateLimited`.
    pub fn enforce(&self, identity: &str) -> Result<RateLimitDecision, ApiError> {
        let decision = self.check(identity);
        if decision.allowed {
            debug!(
                "{} rate limit ok for {}: {} remaining",
                self.capability, identity, decision.remaining
            );
            Ok(decision)
        } else {
            warn!("{} rate limit exceeded for {}", self.capability, identity);
            metrics::inc_rate_limited(self.capability.as_str());
            Err(ApiError::RateLimited(decision))
        }
    }

    pub fn reset(&self, identity: &str) {
        self.store.reset(&self.key(identity));
    }
}

/// One limiter per capability, sharing a counter store.
pub struct RateLimiters {
    pub chat: RateLimiter,
    pub image: RateLimiter,
    pub auth: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(cfg: &Config, store: Arc<dyn CounterStore>) -> Self {
        // Config parsing bounds the window; the clamp covers hand-built configs.
        let secs = cfg.rate_limit_window_seconds.clamp(1, MAX_RATE_LIMIT_WINDOW_SECONDS);
        let window = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(60));
        Self {
            chat: RateLimiter::new(Capability::Chat, cfg.chat_requests_per_window, window, store.clone()),
            image: RateLimiter::new(Capability::Image, cfg.image_requests_per_window, window, store.clone()),
            auth: RateLimiter::new(Capability::Auth, cfg.auth_requests_per_window, window, store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn limiter(ceiling: u32, window_secs: i64) -> RateLimiter {
        RateLimiter::new(
            Capability::Chat,
            ceiling,
            Duration::seconds(window_secs),
            Arc::new(InMemoryCounterStore::new()),
        )
    }

    #[test]
    fn test_first_check_reports_remaining() {
        let limiter = limiter(60, 60);
        let now = Utc::now();
        let decision = limiter.check_at("user-1", now);

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 59);
        assert_eq!(decision.limit, 60);
        assert_eq!(decision.reset_at, now + Duration::seconds(60));
    }

    #[test]
    fn test_denial_keeps_original_reset() {
        let limiter = limiter(2, 60);
        let start = Utc::now();
        limiter.check_at("u", start);
        limiter.check_at("u", start + Duration::seconds(1));

        let denied = limiter.check_at("u", start + Duration::seconds(2));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, start + Duration::seconds(60));
    }

    #[test]
    fn test_window_elapse_readmits() {
        let limiter = limiter(1, 60);
        let start = Utc::now();
        assert!(limiter.check_at("u", start).allowed);
        assert!(!limiter.check_at("u", start + Duration::seconds(30)).allowed);
        assert!(limiter.check_at("u", start + Duration::seconds(61)).allowed);
    }

    #[test]
    fn test_capabilities_are_independent() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let chat = RateLimiter::new(Capability::Chat, 1, Duration::seconds(60), store.clone());
        let image = RateLimiter::new(Capability::Image, 1, Duration::seconds(60), store);
        let now = Utc::now();

        assert!(chat.check_at("u", now).allowed);
        assert!(image.check_at("u", now).allowed);
        assert!(!chat.check_at("u", now).allowed);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(1, 60);
        let now = Utc::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn test_reset_readmits_identity() {
        let limiter = limiter(1, 60);
        let now = Utc::now();
        limiter.check_at("u", now);
        limiter.reset("u");
        assert!(limiter.check_at("u", now).allowed);
    }

    #[test]
    fn test_enforce_maps_denial_to_api_error() {
        let limiter = limiter(1, 60);
        assert!(limiter.enforce("u").is_ok());
        match limiter.enforce("u") {
            Err(ApiError::RateLimited(decision)) => assert_eq!(decision.limit, 1),
            other => panic!("expected rate limit error, got {:?}", other.map(|d| d.allowed)),
        }
    }

    #[test]
    fn test_concurrent_checks_never_exceed_ceiling() {
        let limiter = Arc::new(limiter(25, 60));
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..20).filter(|_| limiter.check_at("shared", now).allowed).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
    }

    #[test]
    fn test_from_config_clamps_out_of_range_window() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let mut cfg = Config::from_lookup(|_| None).unwrap();
        cfg.chat_requests_per_window = 1;

        cfg.rate_limit_window_seconds = u64::MAX;
        let limiters = RateLimiters::from_config(&cfg, store.clone());
        let now = Utc::now();
        let first = limiters.chat.check_at("huge", now);
        assert_eq!(
            first.reset_at,
            now + Duration::seconds(MAX_RATE_LIMIT_WINDOW_SECONDS as i64)
        );
        assert!(!limiters.chat.check_at("huge", now).allowed);

        cfg.rate_limit_window_seconds = 0;
        let limiters = RateLimiters::from_config(&cfg, store);
        assert!(limiters.chat.check_at("zero", now).allowed);
        assert!(!limiters.chat.check_at("zero", now).allowed);
    }

    proptest! {
        #[test]
        fn prop_ceiling_plus_one_is_denied(ceiling in 1u32..50, offsets in prop::collection::vec(0i64..59_000, 1..80)) {
            let limiter = limiter(ceiling, 60);
            let start = Utc::now();
            let mut sorted = offsets.clone();
            sorted.sort_unstable();

            let admitted = sorted
                .iter()
                .filter(|ms| limiter.check_at("p", start + Duration::milliseconds(**ms)).allowed)
                .count() as u32;

            prop_assert_eq!(admitted, ceiling.min(sorted.len() as u32));
            let window_end = start + Duration::milliseconds(sorted[0]) + Duration::seconds(60);
            prop_assert!(limiter.check_at("p", window_end).allowed);
        }
    }
}
