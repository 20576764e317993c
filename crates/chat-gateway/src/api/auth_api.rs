//! Account endpoints: sign-up, sign-in, sign-out, password reset and update,
//! profile update.
//!
//! Public routes are rate-limited by caller address; the two routes behind the
//! session gate are rate-limited by user id. Both use the auth limiter.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use tracing::info;

use crate::auth::{AuthSession, AuthUser, ClientAddress, Identity, SessionCookies, SessionToken, SignUpRequest};
use crate::error::ApiError;
use crate::shared_state::AppState;
use crate::validation::{
    parse_body, validate, LoginInput, PasswordResetInput, PasswordUpdateInput, ProfileUpdateInput,
    RegistrationInput,
};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub message: &'static str,
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub message: &'static str,
    pub user: AuthUser,
}

/// Response with the session cookies set when a session was issued.
fn with_session(state: &AppState, status: StatusCode, body: SessionResponse) -> Response {
    let mut response = (status, Json(&body)).into_response();
    if let Some(session) = &body.session {
        state
            .authenticator
            .attach_session(response.headers_mut(), session);
    }
    response
}

/// POST /api/auth/signup
pub async fn sign_up(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.rate_limiters.auth.enforce(&address)?;
    let input = validate::<RegistrationInput>(&parse_body(&body)).into_result()?;

    let outcome = state
        .authenticator
        .provider()
        .sign_up(&SignUpRequest {
            email: input.email,
            password: input.password,
            first_name: input.first_name,
            last_name: input.last_name,
        })
        .await
        .map_err(|e| ApiError::from_auth(e, "Failed to create user account"))?;

    info!("Created account {}", outcome.user.id);
    Ok(with_session(
        &state,
        StatusCode::CREATED,
        SessionResponse {
            message: "User created successfully. Please check your email to verify your account.",
            user: outcome.user,
            session: outcome.session,
        },
    ))
}

/// POST /api/auth/signin
pub async fn sign_in(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.rate_limiters.auth.enforce(&address)?;
    let input = validate::<LoginInput>(&parse_body(&body)).into_result()?;

    let session = state
        .authenticator
        .provider()
        .sign_in(&input.email, &input.password)
        .await
        .map_err(|e| ApiError::from_auth(e, "Login failed"))?;

    info!("User {} signed in", session.user.id);
    Ok(with_session(
        &state,
        StatusCode::OK,
        SessionResponse {
            message: "Login successful",
            user: session.user.clone(),
            session: Some(session),
        },
    ))
}

/// POST /api/auth/signout. Revokes the cookie session when there is one and
/// always clears the cookies on success.
pub async fn sign_out(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.rate_limiters.auth.enforce(&address)?;

    if let Some(access_token) = SessionCookies::from_headers(&headers).access_token {
        state
            .authenticator
            .provider()
            .sign_out(&access_token)
            .await
            .map_err(|e| ApiError::from_auth(e, "Logout failed"))?;
    }

    let mut response = Json(MessageResponse { message: "Logout successful" }).into_response();
    state.authenticator.clear_session(response.headers_mut());
    Ok(response)
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    state.rate_limiters.auth.enforce(&address)?;
    let input = validate::<PasswordResetInput>(&parse_body(&body)).into_result()?;

    let redirect_to = format!("{}/reset-password", state.config.public_app_url);
    state
        .authenticator
        .provider()
        .reset_password(&input.email, &redirect_to)
        .await
        .map_err(|e| ApiError::from_auth(e, "Failed to send password reset email"))?;

    Ok(Json(MessageResponse {
        message: "Password reset email sent. Please check your inbox.",
    }))
}

/// POST /api/auth/update-password (session required)
pub async fn update_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Extension(SessionToken(access_token)): Extension<SessionToken>,
    body: Bytes,
) -> Result<Json<UserResponse>, ApiError> {
    state.rate_limiters.auth.enforce(&identity.user_id)?;
    let input = validate::<PasswordUpdateInput>(&parse_body(&body)).into_result()?;

    let user = state
        .authenticator
        .provider()
        .update_password(&access_token, &input.password)
        .await
        .map_err(|e| ApiError::from_auth(e, "Failed to update password"))?;

    info!("Password updated for user {}", identity.user_id);
    Ok(Json(UserResponse { message: "Password updated successfully", user }))
}

/// POST /api/auth/profile (session required)
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Extension(SessionToken(access_token)): Extension<SessionToken>,
    body: Bytes,
) -> Result<Json<UserResponse>, ApiError> {
    state.rate_limiters.auth.enforce(&identity.user_id)?;
    let profile = validate::<ProfileUpdateInput>(&parse_body(&body)).into_result()?;
    if profile.is_empty() {
        return Err(ApiError::Validation(vec![
            "profile: At least one field must be provided".to_string(),
        ]));
    }

    let user = state
        .authenticator
        .provider()
        .update_profile(&access_token, &profile)
        .await
        .map_err(|e| ApiError::from_auth(e, "Failed to update profile"))?;

    Ok(Json(UserResponse { message: "Profile updated successfully", user }))
}
