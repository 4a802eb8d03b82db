//! Admin access management.
//!
//! Accounts sign up through the storefront like everyone else; this command
//! flips an existing profile to the `admin` role using the service-role key,
//! which bypasses row-level security.
//!
//! # Environment Variables
//!
//! - `BACKEND_URL` / `BACKEND_ANON_KEY` - Hosted backend project
//! - `BACKEND_SERVICE_ROLE_KEY` - Required for role changes

use shopfront_backend::{BackendClient, BackendError, BackendConfig, ConfigError, CrudService};
use shopfront_core::{Email, EmailError, Profile, ProfilePatch, UserRole};
use thiserror::Error;
use tracing::info;

/// Errors that can occur during admin operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// No profile exists for the address; the account must sign up first.
    #[error("No account found for {0}")]
    NotFound(String),
}

/// Role patch for a promotion, or `None` if the profile is already an admin.
fn promotion(profile: &Profile) -> Option<ProfilePatch> {
    (!profile.is_admin()).then(|| ProfilePatch {
        role: Some(UserRole::Admin),
        ..ProfilePatch::default()
    })
}

/// Give the account registered under `email` admin access.
///
/// # Errors
///
/// Returns `AdminError` if the email is malformed, the service-role key is
/// not configured, no profile matches, or the backend rejects the update.
pub async fn promote(email: &str) -> Result<(), AdminError> {
    let email = Email::parse(email)?;

    let config = BackendConfig::from_env()?;
    config.require_service_role()?;
    let client = BackendClient::new(config)?.service()?;
    let profiles = CrudService::<Profile>::uncached(client);

    let profile = profiles
        .get_by("email", email.as_str())
        .await?
        .ok_or_else(|| AdminError::NotFound(email.to_string()))?;

    let Some(patch) = promotion(&profile) else {
        info!(user_id = %profile.id, "Account is already an admin");
        return Ok(());
    };

    let updated = profiles.update(profile.id, &patch).await?;
    info!(user_id = %updated.id, email = %email, role = %updated.role, "Admin access granted");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use shopfront_core::UserId;

    use super::*;

    fn profile(role: UserRole) -> Profile {
        Profile {
            id: UserId::generate(),
            email: "owner@example.com".into(),
            full_name: None,
            phone: None,
            avatar_url: None,
            role,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_promotion_sets_admin_role() {
        let patch = promotion(&profile(UserRole::Customer)).unwrap();
        assert_eq!(patch.role, Some(UserRole::Admin));
        assert_eq!(patch.full_name, None);
    }

    #[test]
    fn test_promotion_skips_existing_admins() {
        assert!(promotion(&profile(UserRole::Admin)).is_none());
    }

    #[test]
    fn test_not_found_message() {
        let err = AdminError::NotFound("owner@example.com".into());
        assert_eq!(err.to_string(), "No account found for owner@example.com");
    }
}
