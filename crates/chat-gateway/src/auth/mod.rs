//! Session authentication.
//!
//! Every request through the protected router is checked against the identity
//! provider. A rejected access token is refreshed once when a refresh token is
//! present; the replacement cookies ride back on the response.

pub mod cookies;
pub mod gotrue;
pub mod provider;

pub use cookies::{CookiePolicy, SessionCookies, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
pub use gotrue::GoTrueClient;
pub use provider::{
    AuthFailure, AuthSession, AuthUser, Identity, IdentityProvider, SignUpOutcome, SignUpRequest,
};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header::SET_COOKIE, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::error::ApiError;

/// Access token in effect for the current request, after any refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub identity: Identity,
    pub access_token: String,
    /// Set when the access token had to be refreshed.
    pub refreshed: Option<AuthSession>,
}

pub struct SessionAuthenticator {
    provider: Arc<dyn IdentityProvider>,
    cookie_policy: CookiePolicy,
}

impl SessionAuthenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>, cookie_policy: CookiePolicy) -> Self {
        Self { provider, cookie_policy }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookie_policy
    }

    /// Resolve the caller from session cookies. Any failure other than a
    /// rejected token that a refresh can repair yields `None`.
    pub async fn current_identity(&self, headers: &HeaderMap) -> Option<ResolvedSession> {
        let cookies = SessionCookies::from_headers(headers);
        if cookies.is_empty() {
            return None;
        }

        if let Some(access_token) = &cookies.access_token {
            match self.provider.get_user(access_token).await {
                Ok(user) => {
                    return Some(ResolvedSession {
                        identity: Identity::from(&user),
                        access_token: access_token.clone(),
                        refreshed: None,
                    })
                }
                Err(AuthFailure::InvalidSession) => {
                    debug!("Access token rejected, attempting refresh");
                }
                Err(e) => {
                    warn!("Session lookup failed: {}", e);
                    return None;
                }
            }
        }

        let refresh_token = cookies.refresh_token.as_deref()?;
        match self.provider.refresh(refresh_token).await {
            Ok(session) => Some(ResolvedSession {
                identity: session.identity(),
                access_token: session.access_token.clone(),
                refreshed: Some(session),
            }),
            Err(e) => {
                debug!("Session refresh failed: {}", e);
                None
            }
        }
    }

    /// Append `Set-Cookie` values that store `session`.
    pub fn attach_session(&self, headers: &mut HeaderMap, session: &AuthSession) {
        append_cookies(headers, self.cookie_policy.issue(session));
    }

    /// Append `Set-Cookie` values that expire the session cookies.
    pub fn clear_session(&self, headers: &mut HeaderMap) {
        append_cookies(headers, self.cookie_policy.clear());
    }
}

fn append_cookies(headers: &mut HeaderMap, values: Vec<HeaderValue>) {
    for value in values {
        headers.append(SET_COOKIE, value);
    }
}

/// Route-layer middleware for the protected router. Rejects with 401 before
/// the handler runs; otherwise attaches `Identity` and `SessionToken`.
pub async fn require_session(
    State(auth): State<Arc<SessionAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(resolved) = auth.current_identity(request.headers()).await else {
        return ApiError::unauthenticated().into_response();
    };

    debug!("Authenticated request for user {}", resolved.identity.user_id);
    request.extensions_mut().insert(resolved.identity);
    request
        .extensions_mut()
        .insert(SessionToken(resolved.access_token));

    let mut response = next.run(request).await;
    if let Some(session) = &resolved.refreshed {
        auth.attach_session(response.headers_mut(), session);
    }
    response
}

/// Caller network address used as the rate-limit identity on public routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

impl ClientAddress {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let address = forwarded
            .or(real_ip)
            .map(str::to_string)
            .or_else(|| peer.map(|p| p.ip().to_string()))
            .unwrap_or_else(|| Self::UNKNOWN.to_string());

        ClientAddress(address)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientAddress
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddress::from_parts(&parts.headers, peer))
    }
}
