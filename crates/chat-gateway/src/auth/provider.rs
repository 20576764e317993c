//! Identity provider contract and the session types that cross it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::validation::ProfileUpdateInput;

/// Closed set of provider failures. Adapters classify by status and error
/// code, never by message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("provider rate limited")]
    RateLimited,
    #[error("account already exists")]
    DuplicateAccount,
    #[error("weak password")]
    WeakPassword,
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid or expired session")]
    InvalidSession,
    #[error("provider failure: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn identity(&self) -> Identity {
        Identity::from(&self.user)
    }
}

/// Sign-up may or may not issue a session, depending on whether the
/// provider requires email confirmation first.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

/// The caller principal attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

impl From<&AuthUser> for Identity {
    fn from(user: &AuthUser) -> Self {
        Self { user_id: user.id.clone(), email: user.email.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthFailure>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthFailure>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthFailure>;

    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AuthFailure>;

    async fn update_password(&self, access_token: &str, password: &str)
        -> Result<AuthUser, AuthFailure>;

    async fn update_profile(
        &self,
        access_token: &str,
        profile: &ProfileUpdateInput,
    ) -> Result<AuthUser, AuthFailure>;

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthFailure>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthFailure>;
}
