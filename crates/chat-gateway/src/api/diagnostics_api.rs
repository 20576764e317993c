//! Connectivity checks, health check and the placeholder image.

use axum::{
    extract::{Path, State},
    http::{header::CACHE_CONTROL, header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::shared_state::AppState;

const CHECK_SESSION_TITLE: &str = "Test Session";

/// GET /api/test-connection
///
/// Counts both tables, then inserts and deletes a scratch session.
pub async fn test_connection(State(state): State<AppState>) -> Response {
    let store = &state.conversations;

    let check = async {
        let sessions = store.count_sessions().await?;
        let messages = store.count_messages().await?;
        let scratch_id = store.create_session(CHECK_SESSION_TITLE, None).await?;
        let deleted = store.delete_session(&scratch_id).await?;
        anyhow::Ok((sessions, messages, deleted))
    };

    match check.await {
        Ok((sessions, messages, deleted)) => Json(json!({
            "message": "Database connection successful",
            "timestamp": Utc::now().to_rfc3339(),
            "database": {
                "chat_sessions_accessible": true,
                "chat_messages_accessible": true,
                "crud_operations": deleted,
                "total_sessions": sessions,
                "total_messages": messages,
                "total_requests": state.counters.total_requests(),
                "streamed_completions": state.counters.streamed_completions(),
                "generated_images": state.counters.generated_images(),
            },
            "tables": {
                "chat_sessions": "Connected",
                "chat_messages": "Connected",
            },
        }))
        .into_response(),
        Err(e) => {
            error!("Database connection test failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Database connection failed",
                    "details": "Failed to connect to the chat database",
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiStatus {
    pub has_api_key: bool,
    pub api_key_length: usize,
    pub message: String,
    pub environment: String,
}

/// GET /api/test-openai
pub async fn test_openai(State(state): State<AppState>) -> Json<OpenAiStatus> {
    let api_key_length = state
        .config
        .openai_api_key
        .as_ref()
        .map(|k| k.chars().count())
        .unwrap_or(0);
    let has_api_key = api_key_length > 0;

    Json(OpenAiStatus {
        has_api_key,
        api_key_length,
        message: if has_api_key {
            format!("OpenAI API key is configured ({} characters)", api_key_length)
        } else {
            "OpenAI API key is not configured".to_string()
        },
        environment: state.config.app_env.clone(),
    })
}

/// GET /healthz
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

const PLACEHOLDER_DEFAULT: i64 = 400;
const PLACEHOLDER_MAX: i64 = 2000;

/// Leading integer of `raw`, clamped to 1..=2000. Missing or zero → 400.
pub fn clamp_dimension(raw: &str) -> u32 {
    let raw = raw.trim();
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).take(9).collect();

    let value = match digits.parse::<i64>() {
        Ok(0) | Err(_) => PLACEHOLDER_DEFAULT,
        Ok(n) => sign * n,
    };
    value.clamp(1, PLACEHOLDER_MAX) as u32
}

pub fn placeholder_svg(width: u32, height: u32) -> String {
    format!(
        r##"<svg width="{w}" height="{h}" xmlns="http://www.w3.org/2000/svg">
  <rect width="100%" height="100%" fill="#f3f4f6"/>
  <text x="50%" y="50%" text-anchor="middle" dy=".3em" font-family="Arial, sans-serif" font-size="16" fill="#6b7280">Generated Image Placeholder</text>
  <text x="50%" y="60%" text-anchor="middle" dy=".3em" font-family="Arial, sans-serif" font-size="12" fill="#9ca3af">{w}x{h}</text>
</svg>"##,
        w = width,
        h = height
    )
}

/// GET /api/placeholder/:width/:height
pub async fn placeholder(Path((width, height)): Path<(String, String)>) -> Response {
    let svg = placeholder_svg(clamp_dimension(&width), clamp_dimension(&height));
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "image/svg+xml"),
            (CACHE_CONTROL, "public, max-age=31536000"),
        ],
        svg,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_dimension() {
        assert_eq!(clamp_dimension("640"), 640);
        assert_eq!(clamp_dimension("0"), 400);
        assert_eq!(clamp_dimension("abc"), 400);
        assert_eq!(clamp_dimension("-50"), 1);
        assert_eq!(clamp_dimension("99999"), 2000);
        assert_eq!(clamp_dimension("12px"), 12);
    }

    #[test]
    fn test_placeholder_svg_reports_size() {
        let svg = placeholder_svg(300, 200);
        assert!(svg.starts_with("<svg width=\"300\" height=\"200\""));
        assert!(svg.contains(">300x200</text>"));
    }
}
