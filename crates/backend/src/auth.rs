//! Auth service client (sign-up, password sign-in, refresh, profile updates).

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shopfront_core::UserId;
use tracing::{info, instrument};

use crate::client::BackendClient;
use crate::error::BackendError;
use crate::retry::Replay;

/// A user as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AuthUser {
    /// `full_name` from the sign-up metadata.
    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata.get("full_name").and_then(Value::as_str)
    }
}

/// Tokens issued by a successful sign-in or refresh.
///
/// Implements `Debug` manually to redact tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as a Unix timestamp in seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish()
    }
}

impl AuthSession {
    /// Whether the access token expires within `leeway` from now.
    #[must_use]
    pub fn is_expired(&self, leeway: Duration) -> bool {
        let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        Utc::now().timestamp().saturating_add(leeway) >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(t: TokenResponse) -> Self {
        let expires_at = t
            .expires_at
            .or_else(|| jwt_claims(&t.access_token).ok().map(|c| c.exp))
            .unwrap_or_else(|| Utc::now().timestamp() + t.expires_in.unwrap_or(3600));
        Self {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at,
            user: t.user,
        }
    }
}

/// Result of a sign-up.
#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    /// Email confirmation is off; the user is signed in.
    SignedIn(AuthSession),
    /// The user must confirm their email before signing in.
    ConfirmationRequired(AuthUser),
}

/// Changes for [`AuthClient::update_user`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Claims read from an access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Read the claims of a JWT without verifying its signature.
///
/// Only for local decisions such as refreshing ahead of expiry; the backend
/// verifies every token it receives.
///
/// # Errors
///
/// Returns an `Unauthenticated` API error when the token is malformed.
pub fn jwt_claims(token: &str) -> Result<JwtClaims, BackendError> {
    let payload = token.split('.').nth(1).ok_or_else(invalid_jwt)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid_jwt())?;
    serde_json::from_slice(&bytes).map_err(|_| invalid_jwt())
}

fn invalid_jwt() -> BackendError {
    BackendError::Api {
        status: 401,
        code: None,
        message: "invalid JWT".to_string(),
        details: None,
        hint: None,
    }
}

/// Client for the hosted auth service.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: BackendClient,
}

impl AuthClient {
    #[must_use]
    pub const fn new(client: BackendClient) -> Self {
        Self { client }
    }

    fn url(&self, path: &str) -> String {
        self.client.config().auth_url(path)
    }

    /// Register a new user; `metadata` lands in `user_metadata`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` (classified `Duplicate` when the email is taken).
    #[instrument(skip(self, password, metadata))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUpOutcome, BackendError> {
        let url = self.url("signup");
        let body = json!({ "email": email, "password": password, "data": metadata });
        let raw = self
            .client
            .send("auth.sign_up", Replay::Unsafe, || {
                self.client.authorize(self.client.http().post(&url)).json(&body)
            })
            .await?;

        let value: Value = serde_json::from_str(&raw.body)?;
        if value.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(value)?;
            info!("User signed up and signed in");
            Ok(SignUpOutcome::SignedIn(token.into()))
        } else {
            // Without a session the body is the user itself, sometimes nested.
            let user_value = value.get("user").cloned().unwrap_or(value);
            info!("User signed up, confirmation required");
            Ok(SignUpOutcome::ConfirmationRequired(serde_json::from_value(user_value)?))
        }
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on bad credentials or transport failure.
    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let body = json!({ "email": email, "password": password });
        self.token("password", &body).await
    }

    /// Exchange a refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` when the refresh token is invalid or revoked.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let body = json!({ "refresh_token": refresh_token });
        self.token("refresh_token", &body).await
    }

    async fn token(&self, grant_type: &str, body: &Value) -> Result<AuthSession, BackendError> {
        let url = self.url("token");
        let raw = self
            .client
            .send("auth.token", Replay::Unsafe, || {
                self.client
                    .authorize(self.client.http().post(&url))
                    .query(&[("grant_type", grant_type)])
                    .json(body)
            })
            .await?;
        let token: TokenResponse = serde_json::from_str(&raw.body)?;
        Ok(token.into())
    }

    /// Revoke the session behind `access_token`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure.
    #[instrument(skip_all)]
    pub async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let user = self.client.with_access_token(access_token);
        let url = self.url("logout");
        user.send("auth.sign_out", Replay::Unsafe, || user.authorize(user.http().post(&url)))
            .await?;
        Ok(())
    }

    /// The user behind `access_token`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` (classified `Unauthenticated` for bad tokens).
    #[instrument(skip_all)]
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let user = self.client.with_access_token(access_token);
        let url = self.url("user");
        let raw = user
            .send("auth.get_user", Replay::Safe, || user.authorize(user.http().get(&url)))
            .await?;
        Ok(serde_json::from_str(&raw.body)?)
    }

    /// Change the signed-in user's email, password, or metadata.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on rejection or transport failure.
    #[instrument(skip_all)]
    pub async fn update_user(
        &self,
        access_token: &str,
        attributes: &UserAttributes,
    ) -> Result<AuthUser, BackendError> {
        let user = self.client.with_access_token(access_token);
        let url = self.url("user");
        let raw = user
            .send("auth.update_user", Replay::Safe, || {
                user.authorize(user.http().put(&url)).json(attributes)
            })
            .await?;
        Ok(serde_json::from_str(&raw.body)?)
    }

    /// Send a password recovery email that links back to `redirect_to`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure or rate limiting.
    #[instrument(skip(self))]
    pub async fn recover(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), BackendError> {
        let url = self.url("recover");
        let body = json!({ "email": email });
        self.client
            .send("auth.recover", Replay::Unsafe, || {
                let request = self.client.authorize(self.client.http().post(&url));
                let request = match redirect_to {
                    Some(redirect) => request.query(&[("redirect_to", redirect)]),
                    None => request,
                };
                request.json(&body)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token_with(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    fn user() -> AuthUser {
        AuthUser {
            id: UserId::generate(),
            email: Some("ada@example.com".into()),
            email_confirmed_at: None,
            user_metadata: json!({ "full_name": "Ada" }),
            created_at: None,
        }
    }

    #[test]
    fn test_jwt_claims() {
        let token = token_with(&json!({
            "sub": "8d0e3a52-0b7c-4a55-9a56-1f1f5b8d7c11",
            "exp": 1_900_000_000,
            "email": "ada@example.com",
            "role": "authenticated"
        }));
        let claims = jwt_claims(&token).unwrap();
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
        assert_eq!(claims.role.as_deref(), Some("authenticated"));
    }

    #[test]
    fn test_malformed_jwt_is_unauthenticated() {
        for bad in ["", "abc", "a.!!!.c", "a.e30.c"] {
            let err = jwt_claims(bad).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Unauthenticated, "{bad}");
        }
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now().timestamp();
        let session = AuthSession {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: now + 30,
            user: user(),
        };
        assert!(!session.is_expired(Duration::ZERO));
        assert!(session.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_token_response_prefers_explicit_expiry() {
        let body = json!({
            "access_token": "x.y.z",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 42,
            "user": user(),
        });
        let session: AuthSession = serde_json::from_value::<TokenResponse>(body).unwrap().into();
        assert_eq!(session.expires_at, 42);
    }

    #[test]
    fn test_token_response_falls_back_to_claims() {
        let token = token_with(&json!({ "sub": "s", "exp": 1_800_000_000 }));
        let body = json!({ "access_token": token, "refresh_token": "r", "user": user() });
        let session: AuthSession = serde_json::from_value::<TokenResponse>(body).unwrap().into();
        assert_eq!(session.expires_at, 1_800_000_000);
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "access-secret".into(),
            refresh_token: "refresh-secret".into(),
            expires_at: 0,
            user: user(),
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[test]
    fn test_user_attributes_skip_unset() {
        let attrs = UserAttributes {
            password: Some("new-password".into()),
            ..UserAttributes::default()
        };
        assert_eq!(serde_json::to_value(&attrs).unwrap(), json!({ "password": "new-password" }));
    }

    #[test]
    fn test_full_name_from_metadata() {
        assert_eq!(user().full_name(), Some("Ada"));
    }
}
