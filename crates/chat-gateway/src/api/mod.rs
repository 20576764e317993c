// chat-gateway/crates/chat-gateway/src/api/mod.rs
//! HTTP handlers, one module per route group

pub mod auth_api;
pub mod diagnostics_api;
pub mod download_api;
pub mod image_api;
pub mod stream_api;

// Re-export API handlers
pub use auth_api::{reset_password, sign_in, sign_out, sign_up, update_password, update_profile};
pub use diagnostics_api::{healthz, placeholder, test_connection, test_openai};
pub use download_api::download_image;
pub use image_api::{generate_image, ImageResponse};
pub use stream_api::chat_stream;
