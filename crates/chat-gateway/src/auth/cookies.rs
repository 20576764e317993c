//! Session cookie reading and `Set-Cookie` rendering.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

use super::provider::AuthSession;

pub const ACCESS_TOKEN_COOKIE: &str = "chat-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "chat-refresh-token";

/// Tokens carried by the request, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionCookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = SessionCookies::default();
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let Some((name, value)) = pair.trim().split_once('=') else { continue };
                let value = value.trim().trim_matches('"');
                if value.is_empty() {
                    continue;
                }
                match name.trim() {
                    ACCESS_TOKEN_COOKIE => cookies.access_token = Some(value.to_string()),
                    REFRESH_TOKEN_COOKIE => cookies.refresh_token = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        cookies
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Attributes shared by every session cookie.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub max_age_seconds: i64,
}

impl CookiePolicy {
    fn render(&self, name: &str, value: &str, max_age: i64) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            name, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    /// `Set-Cookie` values that store `session`.
    pub fn issue(&self, session: &AuthSession) -> Vec<HeaderValue> {
        [
            self.render(ACCESS_TOKEN_COOKIE, &session.access_token, self.max_age_seconds),
            self.render(REFRESH_TOKEN_COOKIE, &session.refresh_token, self.max_age_seconds),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// `Set-Cookie` values that expire both session cookies.
    pub fn clear(&self) -> Vec<HeaderValue> {
        [
            self.render(ACCESS_TOKEN_COOKIE, "", 0),
            self.render(REFRESH_TOKEN_COOKIE, "", 0),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
