//! Admin sign-in and sign-out.
//!
//! Admins sign in with the same email and password as the storefront; the
//! profile must carry the `admin` role. Accounts without it are signed out of
//! the backend again and rejected with 403.

use axum::{Json, extract::State, http::StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use shopfront_backend::ErrorKind;
use shopfront_core::Email;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use super::ApiJson;
use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{RequireAdmin, clear_current_admin, set_current_admin};
use crate::models::{AdminView, CurrentAdmin, session_keys};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password.";

/// Sign-in request body.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
}

/// Map a sign-in failure without revealing whether the account exists.
fn sign_in_failure(error: AppError) -> AppError {
    match error.kind() {
        ErrorKind::Unauthenticated | ErrorKind::InvalidData | ErrorKind::NotFound => {
            AppError::Unauthorized(INVALID_CREDENTIALS.into())
        }
        _ => error,
    }
}

/// Sign in with email and password.
///
/// POST /auth/login
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AdminView>> {
    let email = Email::parse(&request.email)
        .map_err(|_| AppError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    let auth = state
        .auth()
        .sign_in_with_password(email.as_str(), request.password.expose_secret())
        .await
        .map_err(|e| sign_in_failure(e.into()))?;

    let profile = state.profiles().find(auth.user.id).await?;
    let Some(admin) = profile
        .as_ref()
        .and_then(|profile| CurrentAdmin::from_session(&auth, profile))
    else {
        warn!(user_id = %auth.user.id, "Sign-in without admin role");
        if let Err(e) = state.auth().sign_out(&auth.access_token).await {
            warn!(error = %e, "Token revoke failed after rejected sign-in");
        }
        return Err(AppError::Forbidden(
            "This account does not have admin access.".into(),
        ));
    };

    session.cycle_id().await?;
    set_current_admin(&session, &admin).await?;
    set_sentry_user(&admin.id, Some(admin.email.as_str()));
    info!(admin_id = %admin.id, "Admin signed in");

    Ok(Json(AdminView::from(&admin)))
}

/// Sign out: revoke the backend session and drop the local one.
///
/// POST /auth/logout
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, session: Session) -> Result<StatusCode> {
    let admin: Option<CurrentAdmin> = session
        .get(session_keys::CURRENT_ADMIN)
        .await?;

    if let Some(admin) = admin {
        if let Err(e) = state.auth().sign_out(&admin.access_token).await {
            warn!(error = %e, "Token revoke failed at logout");
        }
        info!(admin_id = %admin.id, "Admin signed out");
    }

    clear_current_admin(&session).await?;
    session.flush().await?;
    clear_sentry_user();

    Ok(StatusCode::NO_CONTENT)
}

/// The signed-in admin.
///
/// GET /api/me
pub async fn me(RequireAdmin(admin): RequireAdmin) -> Json<AdminView> {
    Json(AdminView::from(&admin))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use shopfront_backend::BackendError;

    use super::*;

    #[test]
    fn test_bad_credentials_are_unauthorized() {
        let rejected = sign_in_failure(AppError::from(BackendError::Api {
            status: 400,
            code: Some("invalid_grant".into()),
            message: "Invalid login credentials".into(),
            details: None,
            hint: None,
        }));
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejected.body().message, INVALID_CREDENTIALS);
    }

    #[test]
    fn test_outages_are_not_reported_as_bad_credentials() {
        let timeout = sign_in_failure(AppError::from(BackendError::Timeout(
            Duration::from_secs(15),
        )));
        assert_ne!(timeout.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_login_request_parses() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"email":"ada@example.com","password":"hunter2hunter2"}"#)
                .unwrap();
        assert_eq!(request.email, "ada@example.com");
        assert_eq!(request.password.expose_secret(), "hunter2hunter2");
    }
}
