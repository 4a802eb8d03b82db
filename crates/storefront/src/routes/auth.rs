//! Authentication route handlers.
//!
//! Handles login, registration, logout and password recovery against the
//! hosted auth service. On success the tokens are stored in the session as a
//! [`CurrentUser`]; the session ID is cycled to prevent fixation.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use shopfront_backend::{AuthSession, ErrorKind, SignUpOutcome};
use shopfront_core::{Email, UserRole, ValidationErrors, Validator};
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use super::{non_blank, redirect_with, safe_next};
use crate::error::{
    AppError, Result, add_breadcrumb, clear_sentry_user, describe_validation, set_sentry_user,
};
use crate::filters;
use crate::middleware::{OptionalAuth, PageContext, clear_current_user, set_current_user};
use crate::models::{CurrentUser, Flash};
use crate::state::AppState;

const MIN_PASSWORD_LENGTH: usize = 8;

// =============================================================================
// Form Types
// =============================================================================

/// Login form data.
#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: SecretString,
    pub next: Option<String>,
}

/// Registration form data.
#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub full_name: String,
    pub email: String,
    pub password: SecretString,
    pub password_confirm: SecretString,
    pub next: Option<String>,
}

/// Forgot password form data.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordForm {
    pub email: String,
}

/// Query parameters of the login and register pages.
#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

// =============================================================================
// Templates
// =============================================================================

/// Login page template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
    pub next: String,
}

/// Register page template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/register.html")]
pub struct RegisterTemplate {
    pub page: PageContext,
    pub next: String,
}

/// Forgot password page template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/forgot.html")]
pub struct ForgotPasswordTemplate {
    pub page: PageContext,
}

// =============================================================================
// Helpers
// =============================================================================

fn login_url(next: &str) -> String {
    if next == "/" {
        "/auth/login".to_string()
    } else {
        format!("/auth/login?next={}", urlencoding::encode(next))
    }
}

/// Check registration fields before calling the auth service.
fn check_registration(form: &RegisterForm) -> std::result::Result<(), ValidationErrors> {
    let password = form.password.expose_secret();
    let mut v = Validator::new();
    v.email("email", form.email.trim())
        .max_len("full_name", &form.full_name, 120)
        .min_len("password", password, MIN_PASSWORD_LENGTH)
        .check(
            "password_confirm",
            password == form.password_confirm.expose_secret(),
            "does not match the password",
        );
    v.finish()
}

/// Message for a rejected sign-in. Bad credentials are never told apart from
/// unknown accounts.
fn sign_in_failure(error: &AppError) -> String {
    match error.kind() {
        ErrorKind::Unauthenticated | ErrorKind::InvalidData | ErrorKind::NotFound => {
            "Invalid email or password.".to_string()
        }
        _ => error.user_message(),
    }
}

/// Store a fresh auth session as the signed-in user.
async fn start_session(
    state: &AppState,
    session: &Session,
    auth: &AuthSession,
) -> Result<CurrentUser> {
    // The profile row carries the display name and role.
    let profile = match state
        .profiles()
        .for_user(&auth.access_token)
        .find(auth.user.id)
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            warn!(error = %e, "Profile unavailable at sign-in");
            None
        }
    };
    let (name, role) = profile.map_or((None, UserRole::default()), |p| (p.full_name, p.role));

    let user = CurrentUser::from_session(auth, name, role)
        .ok_or_else(|| AppError::Internal("auth session without a usable email".into()))?;

    session.cycle_id().await?;
    set_current_user(session, &user).await?;
    set_sentry_user(&user.id, Some(user.email.as_str()));
    add_breadcrumb("auth", "Signed in", None);

    Ok(user)
}

// =============================================================================
// Login Routes
// =============================================================================

/// Display the login page.
pub async fn login_page(
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<NextQuery>,
    page: PageContext,
) -> Response {
    let next = safe_next(query.next.as_deref(), "/account");
    if user.is_some() {
        return Redirect::to(&next).into_response();
    }
    LoginTemplate { page, next }.into_response()
}

/// Handle login form submission.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Redirect> {
    let next = safe_next(form.next.as_deref(), "/account");
    let back = login_url(&next);

    let Ok(email) = Email::parse(&form.email) else {
        return Ok(redirect_with(&session, &back, Flash::error("Invalid email or password.")).await);
    };

    let auth = match state
        .auth()
        .sign_in_with_password(email.as_str(), form.password.expose_secret())
        .await
    {
        Ok(auth) => auth,
        Err(e) => {
            let error = AppError::from(e);
            warn!(error = %error, "Login failed");
            return Ok(redirect_with(&session, &back, Flash::error(sign_in_failure(&error))).await);
        }
    };

    let user = start_session(&state, &session, &auth).await?;
    info!(user_id = %user.id, "User logged in");

    Ok(redirect_with(
        &session,
        &next,
        Flash::success(format!("Welcome back, {}!", user.display_name())),
    )
    .await)
}

// =============================================================================
// Registration Routes
// =============================================================================

/// Display the registration page.
pub async fn register_page(
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<NextQuery>,
    page: PageContext,
) -> Response {
    let next = safe_next(query.next.as_deref(), "/account");
    if user.is_some() {
        return Redirect::to(&next).into_response();
    }
    RegisterTemplate { page, next }.into_response()
}

/// Handle registration form submission.
///
/// When the auth service requires email confirmation the visitor is sent to
/// the login page with instructions; otherwise they are signed in directly.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Result<Redirect> {
    const BACK: &str = "/auth/register";
    let next = safe_next(form.next.as_deref(), "/account");

    if let Err(errors) = check_registration(&form) {
        return Ok(redirect_with(&session, BACK, Flash::error(describe_validation(&errors))).await);
    }

    let email = form.email.trim().to_lowercase();
    let metadata = non_blank(Some(form.full_name.clone()))
        .map_or_else(|| json!({}), |name| json!({ "full_name": name }));

    let outcome = match state
        .auth()
        .sign_up(&email, form.password.expose_secret(), metadata)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = if e.kind() == ErrorKind::Duplicate {
                "An account with that email already exists.".to_string()
            } else {
                AppError::from(e).user_message()
            };
            return Ok(redirect_with(&session, BACK, Flash::error(message)).await);
        }
    };

    match outcome {
        SignUpOutcome::SignedIn(auth) => {
            let user = start_session(&state, &session, &auth).await?;
            info!(user_id = %user.id, "User registered");
            let flash = Flash::success("Welcome! Your account is ready.");
            Ok(redirect_with(&session, &next, flash).await)
        }
        SignUpOutcome::ConfirmationRequired(_) => Ok(redirect_with(
            &session,
            &login_url(&next),
            Flash::info(format!(
                "We sent a confirmation link to {email}. Confirm your address, then sign in."
            )),
        )
        .await),
    }
}

// =============================================================================
// Logout
// =============================================================================

/// Sign out: revoke the backend session and drop the local one.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
) -> Result<Redirect> {
    if let Some(user) = user {
        // Local sign-out proceeds even if the revoke call fails.
        if let Err(e) = state.auth().sign_out(&user.access_token).await {
            warn!(error = %e, "Token revoke failed at logout");
        }
        info!(user_id = %user.id, "User logged out");
    }

    clear_current_user(&session).await?;
    session.flush().await?;
    clear_sentry_user();

    Ok(Redirect::to("/"))
}

// =============================================================================
// Password Recovery
// =============================================================================

/// Display the forgot password page.
pub async fn forgot_page(page: PageContext) -> ForgotPasswordTemplate {
    ForgotPasswordTemplate { page }
}

/// Send a recovery email.
///
/// The response is the same whether or not an account exists.
#[instrument(skip_all)]
pub async fn forgot(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Redirect> {
    const BACK: &str = "/auth/forgot";

    let Ok(email) = Email::parse(&form.email) else {
        let flash = Flash::error("Please enter a valid email address.");
        return Ok(redirect_with(&session, BACK, flash).await);
    };

    let redirect_to = state.config().absolute_url("/auth/login");
    if let Err(e) = state.auth().recover(email.as_str(), Some(&redirect_to)).await {
        if e.kind() == ErrorKind::RateLimited {
            return Ok(redirect_with(&session, BACK, Flash::error(e.kind().user_message())).await);
        }
        warn!(error = %e, "Password recovery request failed");
    }

    Ok(redirect_with(
        &session,
        "/auth/login",
        Flash::info("If an account exists for that email, a reset link is on its way."),
    )
    .await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use shopfront_backend::BackendError;

    use super::*;

    fn register_form(password: &str, confirm: &str) -> RegisterForm {
        RegisterForm {
            full_name: "Jo Doe".into(),
            email: "jo@example.com".into(),
            password: SecretString::from(password),
            password_confirm: SecretString::from(confirm),
            next: None,
        }
    }

    #[test]
    fn test_check_registration() {
        assert!(check_registration(&register_form("correct horse", "correct horse")).is_ok());

        let errors = check_registration(&register_form("short", "shorter")).unwrap_err();
        assert_eq!(
            errors.message_for("password"),
            Some("must be at least 8 characters")
        );
        assert_eq!(
            errors.message_for("password_confirm"),
            Some("does not match the password")
        );
    }

    #[test]
    fn test_login_url_keeps_next() {
        assert_eq!(login_url("/"), "/auth/login");
        assert_eq!(
            login_url("/account/orders"),
            "/auth/login?next=%2Faccount%2Forders"
        );
    }

    #[test]
    fn test_sign_in_failure_hides_account_existence() {
        let rejected = AppError::from(BackendError::Api {
            status: 400,
            code: Some("invalid_grant".into()),
            message: "Invalid login credentials".into(),
            details: None,
            hint: None,
        });
        assert_eq!(sign_in_failure(&rejected), "Invalid email or password.");

        let timeout = AppError::from(BackendError::Timeout(std::time::Duration::from_secs(15)));
        assert_ne!(sign_in_failure(&timeout), "Invalid email or password.");
    }
}
