//! Authentication extractors.
//!
//! The signed-in user lives in the session as a [`CurrentUser`]. Both
//! extractors refresh the backend access token when it is about to expire,
//! so handlers always get a usable token.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use shopfront_backend::ErrorKind;
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::models::{CurrentUser, Flash, session_keys};
use crate::state::AppState;

/// Extractor that requires a signed-in user.
///
/// Anonymous visitors are redirected to the login page with a `next`
/// parameter pointing back at the requested page.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}!", user.display_name())
/// }
/// ```
pub struct RequireAuth(pub CurrentUser);

/// Rejection for [`RequireAuth`].
pub enum AuthRejection {
    /// Redirect to the login page, then back to `next`.
    RedirectToLogin { next: String },
    /// No session layer is installed.
    MissingSession,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::RedirectToLogin { next } => {
                Redirect::to(&format!("/auth/login?next={}", urlencoding::encode(&next)))
                    .into_response()
            }
            Self::MissingSession => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(AuthRejection::MissingSession)?;

        match load_user(&session, state).await {
            Some(user) => Ok(Self(user)),
            None => Err(AuthRejection::RedirectToLogin {
                next: parts
                    .uri
                    .path_and_query()
                    .map_or_else(|| "/".to_string(), ToString::to_string),
            }),
        }
    }
}

/// Extractor that optionally gets the signed-in user.
///
/// Unlike `RequireAuth`, this does not reject anonymous visitors.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = match parts.extensions.get::<Session>().cloned() {
            Some(session) => load_user(&session, state).await,
            None => None,
        };
        Ok(Self(user))
    }
}

/// Read the session user, refreshing the access token when it is close to
/// expiry.
///
/// A refresh token the backend rejects ends the session. Transient failures
/// keep the current token so a flaky network does not sign people out.
async fn load_user(session: &Session, state: &AppState) -> Option<CurrentUser> {
    let mut user: CurrentUser = session
        .get(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()?;

    if !user.needs_refresh() {
        return Some(user);
    }

    match state.auth().refresh(&user.refresh_token).await {
        Ok(refreshed) => {
            user.apply_refresh(&refreshed);
            if let Err(e) = set_current_user(session, &user).await {
                warn!(error = %e, "Failed to store refreshed tokens");
            }
            debug!(user_id = %user.id, "Access token refreshed");
            Some(user)
        }
        Err(e) if e.is_retryable() => {
            warn!(user_id = %user.id, error = %e, "Token refresh failed, keeping current token");
            Some(user)
        }
        Err(e) => {
            let reason = e.kind();
            warn!(
                user_id = %user.id,
                error = %e,
                kind = %reason,
                "Token refresh rejected, signing out"
            );
            if let Err(e) = clear_current_user(session).await {
                warn!(error = %e, "Failed to clear session user");
            }
            Flash::info(ErrorKind::Unauthenticated.user_message())
                .set(session)
                .await;
            None
        }
    }
}

/// Store the signed-in user in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &CurrentUser,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CURRENT_USER, user).await
}

/// Remove the signed-in user from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_user(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<CurrentUser>(session_keys::CURRENT_USER)
        .await?;
    Ok(())
}
