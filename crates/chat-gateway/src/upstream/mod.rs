//! External completion and image-generation backends.

pub mod openai;

pub use openai::OpenAiClient;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

/// Upstream failures, classified from status and the error `code`/`type`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream rate limited: {0}")]
    RateLimited(String),
    #[error("upstream quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("content policy violation: {0}")]
    ContentPolicyViolation(String),
    #[error("upstream failure: {0}")]
    Failure(String),
}

/// Lazy, finite sequence of non-empty completion fragments. Dropping it
/// cancels the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
    pub enhanced_prompt: String,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Opens the upstream stream. Errors here happen before any fragment.
    async fn stream_completion(&self, prompt: &str) -> Result<FragmentStream, UpstreamError>;
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, UpstreamError>;
}

pub const CHAT_MODEL: &str = "gpt-4o-mini";
pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Provide clear, concise, and helpful responses.";
pub const CHAT_MAX_TOKENS: u32 = 1000;
pub const CHAT_TEMPERATURE: f32 = 0.7;

pub const IMAGE_MODEL: &str = "dall-e-3";
pub const IMAGE_SIZE: &str = "1024x1024";
pub const IMAGE_QUALITY: &str = "hd";
pub const IMAGE_STYLE: &str = "natural";

/// Wrap a user prompt in the photorealism template sent upstream.
pub fn enhance_prompt(prompt: &str) -> String {
    format!(
        "Create a highly realistic, photorealistic image: {}. Use professional photography \
         style with excellent lighting, sharp details, and natural colors. Make it look like a \
         high-quality photograph, not a drawing or illustration. Focus on the specific details \
         mentioned in the prompt and ensure all elements are clearly visible and well-composed.",
        prompt
    )
}
