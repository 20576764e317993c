//! GoTrue-compatible identity provider over HTTP.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::provider::{
    AuthFailure, AuthSession, AuthUser, IdentityProvider, SignUpOutcome, SignUpRequest,
};
use crate::validation::ProfileUpdateInput;

/// Which call produced an error; decides how code-less failures are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    SignUp,
    SignIn,
    Refresh,
    Authenticated,
    Recover,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GoTrueClient {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl GoTrueClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        builder
    }

    async fn send(builder: RequestBuilder, op: Operation) -> Result<Response, AuthFailure> {
        let response = builder.send().await.map_err(|e| {
            AuthFailure::Provider(format!("identity provider unreachable: {}", e))
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let failure = classify_failure(status, &body, op);
        debug!("Identity provider returned {} for {:?}: {:?}", status, op, failure);
        Err(failure)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AuthFailure> {
        response
            .json::<T>()
            .await
            .map_err(|e| AuthFailure::Provider(format!("unreadable provider response: {}", e)))
    }

    async fn token_grant(&self, grant_type: &str, body: Value, op: Operation) -> Result<AuthSession, AuthFailure> {
        let builder = self
            .request(reqwest::Method::POST, "/token")
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let response = Self::send(builder, op).await?;
        Self::read_json(response).await
    }
}

/// Map a non-2xx provider response onto the closed failure set.
fn classify_failure(status: StatusCode, body: &str, op: Operation) -> AuthFailure {
    let parsed: ProviderErrorBody = serde_json::from_str(body).unwrap_or_default();

    if let Some(code) = parsed.error_code.as_deref() {
        match code {
            "invalid_credentials" => return AuthFailure::InvalidCredentials,
            "email_not_confirmed" => return AuthFailure::EmailNotConfirmed,
            "user_already_exists" | "email_exists" => return AuthFailure::DuplicateAccount,
            "weak_password" => return AuthFailure::WeakPassword,
            "email_address_invalid" | "email_address_not_authorized" => {
                return AuthFailure::InvalidEmail
            }
            "over_request_rate_limit" | "over_email_send_rate_limit" => {
                return AuthFailure::RateLimited
            }
            "session_not_found" | "session_expired" | "bad_jwt" | "no_authorization"
            | "refresh_token_not_found" | "refresh_token_already_used" => {
                return AuthFailure::InvalidSession
            }
            _ => {}
        }
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return AuthFailure::RateLimited;
    }

    match (op, status) {
        (Operation::SignIn, StatusCode::BAD_REQUEST)
            if parsed.error.as_deref() == Some("invalid_grant") =>
        {
            AuthFailure::InvalidCredentials
        }
        (Operation::Refresh, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) => {
            AuthFailure::InvalidSession
        }
        (Operation::Authenticated, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            AuthFailure::InvalidSession
        }
        _ => {
            let detail = parsed
                .msg
                .or(parsed.error_description)
                .or(parsed.error)
                .unwrap_or_else(|| "no detail".to_string());
            AuthFailure::Provider(format!("{:?} failed with {}: {}", op, status, detail))
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthFailure> {
        let mut data = Map::new();
        if let Some(first) = &request.first_name {
            data.insert("first_name".into(), json!(first));
        }
        if let Some(last) = &request.last_name {
            data.insert("last_name".into(), json!(last));
        }

        let builder = self.request(reqwest::Method::POST, "/signup").json(&json!({
            "email": request.email,
            "password": request.password,
            "data": data,
        }));
        let response = Self::send(builder, Operation::SignUp).await?;
        let body: Value = Self::read_json(response).await?;

        // Autoconfirm providers answer with a session; otherwise with the bare user.
        if body.get("access_token").is_some() {
            let session: AuthSession = serde_json::from_value(body)
                .map_err(|e| AuthFailure::Provider(format!("unreadable session: {}", e)))?;
            Ok(SignUpOutcome { user: session.user.clone(), session: Some(session) })
        } else {
            let user: AuthUser = serde_json::from_value(body)
                .map_err(|e| AuthFailure::Provider(format!("unreadable user: {}", e)))?;
            Ok(SignUpOutcome { user, session: None })
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthFailure> {
        self.token_grant(
            "password",
            json!({ "email": email, "password": password }),
            Operation::SignIn,
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthFailure> {
        let builder = self
            .request(reqwest::Method::POST, "/logout")
            .bearer_auth(access_token);
        match Self::send(builder, Operation::Authenticated).await {
            Ok(_) => Ok(()),
            // Already gone on the provider side.
            Err(AuthFailure::InvalidSession) => {
                warn!("Sign-out for a session the provider no longer knows");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AuthFailure> {
        let builder = self
            .request(reqwest::Method::POST, "/recover")
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email }));
        Self::send(builder, Operation::Recover).await?;
        Ok(())
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<AuthUser, AuthFailure> {
        let builder = self
            .request(reqwest::Method::PUT, "/user")
            .bearer_auth(access_token)
            .json(&json!({ "password": password }));
        let response = Self::send(builder, Operation::Authenticated).await?;
        Self::read_json(response).await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        profile: &ProfileUpdateInput,
    ) -> Result<AuthUser, AuthFailure> {
        let mut data = Map::new();
        if let Some(first) = &profile.first_name {
            data.insert("first_name".into(), json!(first));
        }
        if let Some(last) = &profile.last_name {
            data.insert("last_name".into(), json!(last));
        }
        if let Some(avatar) = &profile.avatar_url {
            data.insert("avatar_url".into(), json!(avatar));
        }

        let builder = self
            .request(reqwest::Method::PUT, "/user")
            .bearer_auth(access_token)
            .json(&json!({ "data": data }));
        let response = Self::send(builder, Operation::Authenticated).await?;
        Self::read_json(response).await
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthFailure> {
        let builder = self
            .request(reqwest::Method::GET, "/user")
            .bearer_auth(access_token);
        let response = Self::send(builder, Operation::Authenticated).await?;
        Self::read_json(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthFailure> {
        self.token_grant(
            "refresh_token",
            json!({ "refresh_token": refresh_token }),
            Operation::Refresh,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SESSION_BODY: &str = r#"{
        "access_token": "access-1",
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "expires_at": 1900000000,
        "user": { "id": "user-1", "email": "a@b.com", "user_metadata": {} }
    }"#;

    fn client(server: &mockito::ServerGuard) -> GoTrueClient {
        GoTrueClient::new(server.url(), Some("anon-key".to_string()), Client::new())
    }

    #[tokio::test]
    async fn test_sign_in_returns_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .match_header("apikey", "anon-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SESSION_BODY)
            .create_async()
            .await;

        let session = client(&server).sign_in("a@b.com", "Secret123").await.unwrap();
        assert_eq!(session.access_token, "access-1");
        assert_eq!(session.user.id, "user-1");
        assert_eq!(session.identity().email.as_deref(), Some("a@b.com"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sign_in_classifies_by_error_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":400,"error_code":"email_not_confirmed","msg":"Email not confirmed"}"#)
            .create_async()
            .await;

        let err = client(&server).sign_in("a@b.com", "Secret123").await.unwrap_err();
        assert_eq!(err, AuthFailure::EmailNotConfirmed);
    }

    #[tokio::test]
    async fn test_legacy_invalid_grant_is_invalid_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
            .create_async()
            .await;

        let err = client(&server).sign_in("a@b.com", "wrong").await.unwrap_err();
        assert_eq!(err, AuthFailure::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_sign_up_without_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/signup")
            .match_body(Matcher::PartialJson(json!({ "data": { "first_name": "Ada" } })))
            .with_status(200)
            .with_body(r#"{"id":"user-2","email":"ada@b.com","user_metadata":{"first_name":"Ada"}}"#)
            .create_async()
            .await;

        let outcome = client(&server)
            .sign_up(&SignUpRequest {
                email: "ada@b.com".into(),
                password: "Str0ngPass".into(),
                first_name: Some("Ada".into()),
                last_name: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.user.id, "user-2");
        assert!(outcome.session.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_account() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/signup")
            .with_status(422)
            .with_body(r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .sign_up(&SignUpRequest {
                email: "a@b.com".into(),
                password: "Str0ngPass".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, AuthFailure::DuplicateAccount);
    }

    #[tokio::test]
    async fn test_get_user_rejected_token_is_invalid_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"msg":"invalid JWT"}"#)
            .create_async()
            .await;

        let err = client(&server).get_user("stale").await.unwrap_err();
        assert_eq!(err, AuthFailure::InvalidSession);
    }

    #[tokio::test]
    async fn test_status_429_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/recover")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let err = client(&server)
            .reset_password("a@b.com", "http://localhost:3000/reset-password")
            .await
            .unwrap_err();
        assert_eq!(err, AuthFailure::RateLimited);
    }

    #[tokio::test]
    async fn test_unexpected_status_is_provider_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/user")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client(&server).update_password("tok", "N3wPassword").await.unwrap_err();
        assert!(matches!(err, AuthFailure::Provider(_)));
    }

    #[tokio::test]
    async fn test_sign_out_tolerates_unknown_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logout")
            .with_status(401)
            .create_async()
            .await;

        assert!(client(&server).sign_out("gone").await.is_ok());
    }
}
