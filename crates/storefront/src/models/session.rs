//! Session-related types.
//!
//! Types stored in the session for authentication state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shopfront_backend::AuthSession;
use shopfront_core::{Email, UserId, UserRole};

/// Refresh the access token when it expires within this many seconds.
pub const REFRESH_LEEWAY_SECS: i64 = 60;

/// Session-stored user identity and backend tokens.
///
/// Implements `Debug` manually to redact tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Auth user ID (also the profile row ID).
    pub id: UserId,
    /// User's email address.
    pub email: Email,
    /// Display name from the profile, if set.
    #[serde(default)]
    pub name: Option<String>,
    /// Backend access token; requests made with it run under RLS as this user.
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (Unix seconds).
    pub expires_at: i64,
    #[serde(default)]
    pub role: UserRole,
}

impl std::fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentUser")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CurrentUser {
    /// Build from a fresh auth session.
    ///
    /// Returns `None` when the auth service reported no usable email.
    #[must_use]
    pub fn from_session(
        session: &AuthSession,
        name: Option<String>,
        role: UserRole,
    ) -> Option<Self> {
        let email = Email::parse(session.user.email.as_deref()?).ok()?;
        Some(Self {
            id: session.user.id,
            email,
            name: name.or_else(|| session.user.full_name().map(ToString::to_string)),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
            role,
        })
    }

    /// Whether the access token needs refreshing.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        Utc::now().timestamp() + REFRESH_LEEWAY_SECS >= self.expires_at
    }

    /// Swap in refreshed tokens, keeping identity and role.
    pub fn apply_refresh(&mut self, session: &AuthSession) {
        self.access_token.clone_from(&session.access_token);
        self.refresh_token.clone_from(&session.refresh_token);
        self.expires_at = session.expires_at;
    }

    /// Name to greet the user with.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.email.local_part())
    }
}

/// Session keys.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Key for the session cart.
    pub const CART: &str = "cart";

    /// Key for the product compare list.
    pub const COMPARE: &str = "compare";

    /// Key for the one-shot flash message.
    pub const FLASH: &str = "flash";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use shopfront_backend::AuthUser;

    use super::*;

    fn auth_session(expires_at: i64) -> AuthSession {
        AuthSession {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at,
            user: AuthUser {
                id: UserId::generate(),
                email: Some("jo@example.com".into()),
                email_confirmed_at: None,
                user_metadata: json!({ "full_name": "Jo Doe" }),
                created_at: None,
            },
        }
    }

    #[test]
    fn test_from_session_uses_metadata_name() {
        let user = CurrentUser::from_session(&auth_session(0), None, UserRole::Customer).unwrap();
        assert_eq!(user.display_name(), "Jo Doe");
        assert_eq!(user.email.as_str(), "jo@example.com");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut user =
            CurrentUser::from_session(&auth_session(0), None, UserRole::Customer).unwrap();
        user.name = Some("  ".into());
        assert_eq!(user.display_name(), "jo");
    }

    #[test]
    fn test_refresh_window() {
        let now = Utc::now().timestamp();
        let mut user =
            CurrentUser::from_session(&auth_session(now + 30), None, UserRole::Customer).unwrap();
        assert!(user.needs_refresh());

        user.apply_refresh(&auth_session(now + 3600));
        assert!(!user.needs_refresh());
        assert_eq!(user.role, UserRole::Customer);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let user = CurrentUser::from_session(&auth_session(0), None, UserRole::Admin).unwrap();
        let debug = format!("{user:?}");
        assert!(!debug.contains("access\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
