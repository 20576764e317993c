// chat-gateway/crates/chat-gateway/src/lib.rs

pub mod api;
pub mod auth;
pub mod chat_db;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod upstream;
pub mod utils;
pub mod validation;

// Public API exports
pub use config::Config;
pub use error::ApiError;
pub use server::{build_router, build_state, run_server};
pub use shared_state::AppState;

// Adapter seams
pub use auth::IdentityProvider;
pub use chat_db::{ChatDatabase, ConversationStore};
pub use rate_limit::CounterStore;
pub use upstream::{CompletionBackend, ImageBackend};
