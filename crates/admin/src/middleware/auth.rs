//! Authentication extractor for the admin API.
//!
//! The signed-in admin lives in the session as a [`CurrentAdmin`]. When the
//! access token is about to expire it is refreshed and the profile's role is
//! checked again, so a demoted admin loses access within one token lifetime.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{CurrentAdmin, session_keys};
use crate::state::AppState;

/// Extractor that requires a signed-in admin.
///
/// Rejects with a JSON 401 when nobody is signed in, and 403 when the
/// account has lost the admin role.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(RequireAdmin(admin): RequireAdmin) -> impl IntoResponse {
///     format!("Hello, {}!", admin.name)
/// }
/// ```
pub struct RequireAdmin(pub CurrentAdmin);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("session layer missing".into()))?;

        let admin: CurrentAdmin = session
            .get(session_keys::CURRENT_ADMIN)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Please sign in.".into()))?;

        if !admin.needs_refresh() {
            return Ok(Self(admin));
        }
        refresh(&session, state, admin).await.map(Self)
    }
}

/// Refresh the admin's tokens and confirm they still hold the admin role.
async fn refresh(
    session: &Session,
    state: &AppState,
    mut admin: CurrentAdmin,
) -> Result<CurrentAdmin, AppError> {
    let refreshed = match state.auth().refresh(&admin.refresh_token).await {
        Ok(refreshed) => refreshed,
        Err(e) if e.is_retryable() => {
            warn!(admin_id = %admin.id, error = %e, "Token refresh failed, keeping current token");
            return Ok(admin);
        }
        Err(e) => {
            warn!(admin_id = %admin.id, error = %e, "Token refresh rejected, signing out");
            clear_current_admin(session).await?;
            return Err(AppError::Unauthorized(
                "Your session has expired. Please sign in again.".into(),
            ));
        }
    };

    let still_admin = state
        .profiles()
        .find(admin.id)
        .await?
        .is_some_and(|profile| profile.is_admin());
    if !still_admin {
        warn!(admin_id = %admin.id, "Admin role revoked, signing out");
        clear_current_admin(session).await?;
        return Err(AppError::Forbidden("This account no longer has admin access.".into()));
    }

    admin.apply_refresh(&refreshed);
    set_current_admin(session, &admin).await?;
    debug!(admin_id = %admin.id, "Access token refreshed");
    Ok(admin)
}

/// Store the signed-in admin in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_admin(
    session: &Session,
    admin: &CurrentAdmin,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CURRENT_ADMIN, admin).await
}

/// Remove the signed-in admin from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_admin(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<CurrentAdmin>(session_keys::CURRENT_ADMIN)
        .await?;
    Ok(())
}
