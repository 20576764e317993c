//! Error taxonomy shared by every route handler.
//!
//! Handlers return `Result<_, ApiError>`; the `IntoResponse` impl is the single
//! place where a failure becomes an HTTP status and a `{error, details?}` body.
//! Verbose causes are logged where the error is classified and never echoed.

use axum::{
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthFailure;
use crate::rate_limit::RateLimitDecision;
use crate::upstream::UpstreamError;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded for {} more ms", .0.retry_after_ms())]
    RateLimited(RateLimitDecision),

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("upstream quota exceeded")]
    QuotaExceeded,

    #[error("content policy violation")]
    ContentPolicyViolation,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    Message(String),
    List(Vec<String>),
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("Authentication required".to_string())
    }

    pub fn upstream_not_configured() -> Self {
        error!("Upstream API key not configured");
        ApiError::Internal("OpenAI API key not configured".to_string())
    }

    /// Map an upstream gateway failure. `fallback` is the public message for
    /// the generic-failure case and differs per route.
    pub fn from_upstream(err: UpstreamError, fallback: &str) -> Self {
        error!("Upstream call failed: {}", err);
        match err {
            UpstreamError::RateLimited(_) => ApiError::UpstreamRateLimited(
                "Rate limit exceeded. Please try again later.".to_string(),
            ),
            UpstreamError::QuotaExceeded(_) => ApiError::QuotaExceeded,
            UpstreamError::ContentPolicyViolation(_) => ApiError::ContentPolicyViolation,
            UpstreamError::Failure(_) => ApiError::UpstreamFailure(fallback.to_string()),
        }
    }

    /// Map an identity-provider failure. `fallback` is the public message for
    /// provider failures that have no dedicated status.
    pub fn from_auth(err: AuthFailure, fallback: &str) -> Self {
        match err {
            AuthFailure::InvalidCredentials => {
                ApiError::Unauthorized("Invalid email or password".to_string())
            }
            AuthFailure::EmailNotConfirmed => ApiError::Unauthorized(
                "Please verify your email before signing in".to_string(),
            ),
            AuthFailure::InvalidSession => ApiError::unauthenticated(),
            AuthFailure::RateLimited => ApiError::UpstreamRateLimited(
                "Too many attempts. Please try again later.".to_string(),
            ),
            AuthFailure::DuplicateAccount => {
                ApiError::Conflict("User with this email already exists".to_string())
            }
            AuthFailure::WeakPassword => ApiError::Validation(vec![
                "password: Password does not meet requirements".to_string(),
            ]),
            AuthFailure::InvalidEmail => {
                ApiError::Validation(vec!["email: Invalid email format".to_string()])
            }
            AuthFailure::Provider(detail) => {
                error!("Identity provider failure: {}", detail);
                ApiError::Internal(fallback.to_string())
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::ContentPolicyViolation => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) | ApiError::UpstreamRateLimited(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamFailure(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        let (error, details) = match self {
            ApiError::Validation(errors) => (
                "Validation failed".to_string(),
                Some(ErrorDetails::List(errors.clone())),
            ),
            ApiError::Unauthorized(message) => (message.clone(), None),
            ApiError::RateLimited(_) => (
                "Rate limit exceeded".to_string(),
                Some(ErrorDetails::Message(
                    "Too many requests. Please try again later.".to_string(),
                )),
            ),
            ApiError::UpstreamRateLimited(message) => (message.clone(), None),
            ApiError::QuotaExceeded => (
                "API quota exceeded. Please check your OpenAI account.".to_string(),
                None,
            ),
            ApiError::ContentPolicyViolation => (
                "Content policy violation. Please modify your prompt.".to_string(),
                None,
            ),
            ApiError::Conflict(message)
            | ApiError::UpstreamFailure(message)
            | ApiError::Internal(message) => (message.clone(), None),
        };
        ErrorBody { error, details }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        let mut response = (status, Json(self.body())).into_response();

        if let ApiError::RateLimited(decision) = &self {
            let headers = response.headers_mut();
            let retry_after_secs = (decision.retry_after_ms() + 999) / 1000;
            for (name, value) in [
                (X_RATELIMIT_LIMIT, decision.limit.to_string()),
                (X_RATELIMIT_REMAINING, decision.remaining.to_string()),
                (X_RATELIMIT_RESET, decision.reset_at.timestamp_millis().to_string()),
                (RETRY_AFTER, retry_after_secs.to_string()),
            ] {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
        }

        response
    }
}
