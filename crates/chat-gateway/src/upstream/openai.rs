//! OpenAI-compatible chat completions and image generation over HTTP.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    enhance_prompt, CompletionBackend, FragmentStream, GeneratedImage, ImageBackend,
    UpstreamError, CHAT_MAX_TOKENS, CHAT_MODEL, CHAT_SYSTEM_PROMPT, CHAT_TEMPERATURE,
    IMAGE_MODEL, IMAGE_QUALITY, IMAGE_SIZE, IMAGE_STYLE,
};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    quality: &'a str,
    style: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl ErrorDetail {
    fn is(&self, tag: &str) -> bool {
        self.code.as_deref() == Some(tag) || self.kind.as_deref() == Some(tag)
    }

    fn into_error(self, status: Option<StatusCode>) -> UpstreamError {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| "no message".to_string());
        let detail = match status {
            Some(status) => format!("{}: {}", status, message),
            None => message,
        };

        if self.is("insufficient_quota") {
            UpstreamError::QuotaExceeded(detail)
        } else if self.is("content_policy_violation") {
            UpstreamError::ContentPolicyViolation(detail)
        } else if status == Some(StatusCode::TOO_MANY_REQUESTS) || self.is("rate_limit_exceeded") {
            UpstreamError::RateLimited(detail)
        } else {
            UpstreamError::Failure(detail)
        }
    }
}

fn classify_error(status: StatusCode, body: &str) -> UpstreamError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    envelope
        .error
        .unwrap_or_default()
        .into_error(Some(status))
}

/// Extract the text fragment from one SSE `data:` payload.
fn parse_stream_data(data: &str) -> Result<Option<String>, UpstreamError> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unreadable stream chunk: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(error.into_error(None));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|content| !content.is_empty()))
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    http_client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, http_client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("OpenAI client initialized with base URL: {}", base_url);
        Self { api_key: api_key.into(), base_url, http_client }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn images_url(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::Failure(format!("request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn stream_completion(&self, prompt: &str) -> Result<FragmentStream, UpstreamError> {
        debug!("Opening completion stream");
        let request = ChatCompletionRequest {
            model: CHAT_MODEL,
            messages: vec![
                ChatMessage { role: "system", content: CHAT_SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
            stream: true,
        };

        let response = self.post(&self.completions_url(), &request).await?;
        let byte_stream = response.bytes_stream();

        let fragments = async_stream::stream! {
            // Bytes, not text: a multi-byte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();
            futures_util::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(UpstreamError::Failure(format!("stream read error: {}", e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    match parse_stream_data(data) {
                        Ok(Some(fragment)) => {
                            yield Ok(fragment);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if !buffer.is_empty() {
                warn!("Completion stream ended without a terminating [DONE]");
            }
        };

        Ok(Box::pin(fragments))
    }
}

#[async_trait]
impl ImageBackend for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, UpstreamError> {
        let enhanced = enhance_prompt(prompt);
        let request = ImageGenerationRequest {
            model: IMAGE_MODEL,
            prompt: &enhanced,
            n: 1,
            size: IMAGE_SIZE,
            quality: IMAGE_QUALITY,
            style: IMAGE_STYLE,
        };

        let response = self.post(&self.images_url(), &request).await?;
        let generated: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Failure(format!("unreadable image response: {}", e)))?;

        let url = generated
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| UpstreamError::Failure("no image URL in response".to_string()))?;

        Ok(GeneratedImage { url, enhanced_prompt: enhanced })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> OpenAiClient {
        OpenAiClient::new("sk-test", format!("{}/v1", server.url()), Client::new())
    }

    fn sse(fragments: &[&str]) -> String {
        let mut body = String::new();
        for fragment in fragments {
            let chunk = json!({ "choices": [{ "delta": { "content": fragment } }] });
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn test_stream_yields_non_empty_fragments() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "stream": true,
                "max_tokens": 1000,
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse(&["Hel", "", "lo", " ✓"]))
            .create_async()
            .await;

        let stream = client(&server).stream_completion("Hi").await.unwrap();
        let fragments: Vec<String> = stream.try_collect().await.unwrap();

        assert_eq!(fragments, vec!["Hel", "lo", " ✓"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_nothing_after_done_is_read() {
        let mut server = mockito::Server::new_async().await;
        let mut body = sse(&["one"]);
        body.push_str(&sse(&["two"]));
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let fragments: Vec<String> = client(&server)
            .stream_completion("Hi")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["one"]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_event_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "data: {}\n\ndata: {}\n\n",
            json!({ "choices": [{ "delta": { "content": "partial" } }] }),
            json!({ "error": { "message": "overloaded", "type": "server_error" } }),
        );
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let mut stream = client(&server).stream_completion("Hi").await.unwrap();
        assert_eq!(stream.next().await, Some(Ok("partial".to_string())));
        assert!(matches!(stream.next().await, Some(Err(UpstreamError::Failure(_)))));
    }

    #[tokio::test]
    async fn test_open_errors_are_classified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#)
            .create_async()
            .await;

        let err = client(&server).stream_completion("Hi").await.err().unwrap();
        assert!(matches!(err, UpstreamError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_plain_429_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
            .create_async()
            .await;

        let err = client(&server).stream_completion("Hi").await.err().unwrap();
        assert!(matches!(err, UpstreamError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_generate_sends_enhanced_prompt() {
        let mut server = mockito::Server::new_async().await;
        let expected_prompt = enhance_prompt("a red fox");
        let mock = server
            .mock("POST", "/v1/images/generations")
            .match_body(Matcher::PartialJson(json!({
                "model": "dall-e-3",
                "prompt": expected_prompt,
                "n": 1,
                "size": "1024x1024",
                "quality": "hd",
                "style": "natural",
            })))
            .with_status(200)
            .with_body(r#"{"created":1,"data":[{"url":"https://img.example.com/fox.png"}]}"#)
            .create_async()
            .await;

        let image = client(&server).generate("a red fox").await.unwrap();
        assert_eq!(image.url, "https://img.example.com/fox.png");
        assert_eq!(image.enhanced_prompt, expected_prompt);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_content_policy() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/images/generations")
            .with_status(400)
            .with_body(r#"{"error":{"message":"rejected","type":"invalid_request_error","code":"content_policy_violation"}}"#)
            .create_async()
            .await;

        let err = client(&server).generate("something").await.unwrap_err();
        assert!(matches!(err, UpstreamError::ContentPolicyViolation(_)));
    }

    #[tokio::test]
    async fn test_generate_without_url_is_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/images/generations")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let err = client(&server).generate("something").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Failure(_)));
    }
}
