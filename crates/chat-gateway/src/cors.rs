//! Origin allow-list and preflight handling.
//!
//! Runs outside every other layer: `OPTIONS` is answered here and never
//! reaches authentication, and every other response, errors included, leaves
//! with the CORS headers attached.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
            ORIGIN, VARY,
        },
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::config::Config;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-User-Id, X-User-Email";
const MAX_AGE_SECONDS: &str = "86400";

const LOCAL_DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];

#[derive(Debug, Clone)]
pub struct CorsNegotiator {
    origins: Vec<String>,
}

impl CorsNegotiator {
    /// First entry is the fallback origin. Duplicates are dropped.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for origin in origins {
            let origin = origin.into().trim_end_matches('/').to_string();
            if !origin.is_empty() && !list.contains(&origin) {
                list.push(origin);
            }
        }
        Self { origins: list }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut origins = vec![cfg.public_app_url.clone()];
        origins.extend(LOCAL_DEV_ORIGINS.iter().map(|o| o.to_string()));
        origins.extend(cfg.allowed_origins.iter().cloned());
        Self::new(origins)
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    /// The request origin when listed, otherwise the first configured one.
    pub fn resolve_origin(&self, request_origin: Option<&str>) -> Option<&str> {
        request_origin
            .and_then(|origin| self.origins.iter().find(|o| o.as_str() == origin))
            .or_else(|| self.origins.first())
            .map(String::as_str)
    }

    /// A complete response for `OPTIONS`, `None` for any other method.
    pub fn preflight(&self, method: &Method, headers: &HeaderMap) -> Option<Response> {
        if method != Method::OPTIONS {
            return None;
        }
        let mut response = StatusCode::OK.into_response();
        self.decorate(response.headers_mut(), request_origin(headers));
        Some(response)
    }

    pub fn decorate(&self, headers: &mut HeaderMap, request_origin: Option<&str>) {
        if let Some(origin) = self.resolve_origin(request_origin) {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECONDS));
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(ORIGIN).and_then(|v| v.to_str().ok())
}

/// Outermost application middleware.
pub async fn negotiate(
    State(cors): State<Arc<CorsNegotiator>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(response) = cors.preflight(request.method(), request.headers()) {
        debug!("Answered preflight for {}", request.uri().path());
        return response;
    }

    let origin = request_origin(request.headers()).map(str::to_string);
    let mut response = next.run(request).await;
    cors.decorate(response.headers_mut(), origin.as_deref());
    response
}
