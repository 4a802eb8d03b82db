//! Session-related types for admin authentication.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shopfront_backend::AuthSession;
use shopfront_core::{Email, Profile, UserId};

/// Refresh the access token when it expires within this many seconds.
pub const REFRESH_LEEWAY_SECS: i64 = 60;

/// Session-stored admin identity.
///
/// Data calls use the service-role client; the admin's own tokens are kept
/// so the session can be revoked at logout and its role re-checked on
/// refresh. Implements `Debug` manually to redact tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct CurrentAdmin {
    /// Auth user ID (also the profile row ID).
    pub id: UserId,
    /// Admin's email address.
    pub email: Email,
    /// Admin's display name.
    pub name: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (Unix seconds).
    pub expires_at: i64,
}

impl std::fmt::Debug for CurrentAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentAdmin")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CurrentAdmin {
    /// Build from a fresh sign-in, if `profile` carries the admin role.
    #[must_use]
    pub fn from_session(session: &AuthSession, profile: &Profile) -> Option<Self> {
        if !profile.is_admin() || profile.id != session.user.id {
            return None;
        }
        let email = Email::parse(session.user.email.as_deref().unwrap_or(&profile.email)).ok()?;
        Some(Self {
            id: profile.id,
            email,
            name: profile.display_name().to_string(),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        })
    }

    /// Whether the access token needs refreshing.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        Utc::now().timestamp() + REFRESH_LEEWAY_SECS >= self.expires_at
    }

    /// Swap in refreshed tokens.
    pub fn apply_refresh(&mut self, session: &AuthSession) {
        self.access_token.clone_from(&session.access_token);
        self.refresh_token.clone_from(&session.refresh_token);
        self.expires_at = session.expires_at;
    }
}

/// What `GET /api/me` returns.
#[derive(Debug, Clone, Serialize)]
pub struct AdminView {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

impl From<&CurrentAdmin> for AdminView {
    fn from(admin: &CurrentAdmin) -> Self {
        Self {
            id: admin.id,
            email: admin.email.to_string(),
            name: admin.name.clone(),
        }
    }
}

/// Session keys for admin authentication data.
pub mod keys {
    /// Key for storing the current logged-in admin.
    pub const CURRENT_ADMIN: &str = "current_admin";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use shopfront_backend::AuthUser;
    use shopfront_core::UserRole;

    use super::*;

    fn auth_session(id: UserId, expires_at: i64) -> AuthSession {
        AuthSession {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at,
            user: AuthUser {
                id,
                email: Some("ada@example.com".into()),
                email_confirmed_at: None,
                user_metadata: json!({}),
                created_at: None,
            },
        }
    }

    fn profile(id: UserId, role: UserRole) -> Profile {
        Profile {
            id,
            email: "ada@example.com".into(),
            full_name: Some("Ada Lovelace".into()),
            phone: None,
            avatar_url: None,
            role,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_from_session_requires_admin_role() {
        let id = UserId::generate();
        let session = auth_session(id, Utc::now().timestamp() + 3600);

        let admin = CurrentAdmin::from_session(&session, &profile(id, UserRole::Admin)).unwrap();
        assert_eq!(admin.name, "Ada Lovelace");
        assert!(!admin.needs_refresh());

        assert!(CurrentAdmin::from_session(&session, &profile(id, UserRole::Customer)).is_none());
        assert!(
            CurrentAdmin::from_session(&session, &profile(UserId::generate(), UserRole::Admin))
                .is_none()
        );
    }

    #[test]
    fn test_refresh_window() {
        let id = UserId::generate();
        let session = auth_session(id, Utc::now().timestamp() + 30);
        let mut admin =
            CurrentAdmin::from_session(&session, &profile(id, UserRole::Admin)).unwrap();
        assert!(admin.needs_refresh());

        let mut fresh = auth_session(id, Utc::now().timestamp() + 3600);
        fresh.access_token = "access-2".into();
        admin.apply_refresh(&fresh);
        assert_eq!(admin.access_token, "access-2");
        assert!(!admin.needs_refresh());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let id = UserId::generate();
        let session = auth_session(id, 0);
        let admin = CurrentAdmin::from_session(&session, &profile(id, UserRole::Admin)).unwrap();
        let debug = format!("{admin:?}");
        assert!(!debug.contains("access\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
