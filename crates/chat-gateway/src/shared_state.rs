//! Shared application state
//!
//! One `AppState` is built at startup and cloned into every handler. All
//! members are behind `Arc`; the only mutable shared data is the rate-limit
//! counters, the connection pools and the atomic counters below.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::{
    auth::{CookiePolicy, IdentityProvider, SessionAuthenticator},
    chat_db::ConversationStore,
    config::Config,
    cors::CorsNegotiator,
    rate_limit::{InMemoryCounterStore, RateLimiters},
    upstream::{CompletionBackend, ImageBackend},
};

/// Process-lifetime counters, reported by the connectivity check.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub total_requests: AtomicUsize,
    pub streamed_completions: AtomicUsize,
    pub generated_images: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_total_requests(&self) -> usize {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_streamed_completions(&self) -> usize {
        self.streamed_completions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_generated_images(&self) -> usize {
        self.generated_images.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_requests(&self) -> usize {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn streamed_completions(&self) -> usize {
        self.streamed_completions.load(Ordering::Relaxed)
    }

    pub fn generated_images(&self) -> usize {
        self.generated_images.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cors: Arc<CorsNegotiator>,
    pub rate_limiters: Arc<RateLimiters>,
    pub authenticator: Arc<SessionAuthenticator>,
    /// `None` when no upstream API key is configured.
    pub completions: Option<Arc<dyn CompletionBackend>>,
    pub images: Option<Arc<dyn ImageBackend>>,
    pub conversations: Arc<dyn ConversationStore>,
    pub http_client: reqwest::Client,
    pub counters: Arc<AtomicCounters>,
}

impl AppState {
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        completions: Option<Arc<dyn CompletionBackend>>,
        images: Option<Arc<dyn ImageBackend>>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let cors = CorsNegotiator::from_config(&config);
        let rate_limiters =
            RateLimiters::from_config(&config, Arc::new(InMemoryCounterStore::new()));
        let cookie_policy = CookiePolicy {
            secure: config.secure_cookies(),
            max_age_seconds: config.session_cookie_max_age_seconds,
        };

        info!(
            "Application state ready ({} allowed origins, completions {}, images {})",
            cors.origins().len(),
            if completions.is_some() { "enabled" } else { "disabled" },
            if images.is_some() { "enabled" } else { "disabled" },
        );

        Self {
            config: Arc::new(config),
            cors: Arc::new(cors),
            rate_limiters: Arc::new(rate_limiters),
            authenticator: Arc::new(SessionAuthenticator::new(provider, cookie_policy)),
            completions,
            images,
            conversations,
            http_client: reqwest::Client::new(),
            counters: Arc::new(AtomicCounters::new()),
        }
    }

    /// Swap the HTTP client used for image downloads.
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }
}
