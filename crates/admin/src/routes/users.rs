//! Customer profiles and admin role management.

use axum::{Json, extract::State};
use serde::Deserialize;
use shopfront_backend::{Order, Page, Query};
use shopfront_core::{Profile, ProfilePatch, UserId, UserRole, ValidationErrors};
use tracing::{info, instrument};

use super::{ApiJson, ApiPath, ApiQuery, page_number, parse_filter, search_term};
use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::CurrentAdmin;
use crate::state::AppState;

/// Query parameters for the user list.
#[derive(Debug, Default, Deserialize)]
pub struct UserFilters {
    pub q: Option<String>,
    pub role: Option<String>,
    pub page: Option<u64>,
}

impl UserFilters {
    /// Backend query for these filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for an unknown role.
    pub fn query(&self) -> Result<Query> {
        let mut query = Query::new().order("created_at", Order::Desc);
        if let Some(term) = search_term(self.q.as_deref()) {
            query = query.search(&["email", "full_name"], term);
        }
        if let Some(role) = parse_filter::<UserRole>(self.role.as_deref())? {
            query = query.eq("role", role);
        }
        Ok(query)
    }
}

/// Body of `PATCH /api/users/{id}/role`.
#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: UserRole,
}

/// Admins cannot take away their own access.
fn check_role_change(
    admin: &CurrentAdmin,
    target: UserId,
    role: UserRole,
) -> std::result::Result<(), ValidationErrors> {
    if target == admin.id && role != UserRole::Admin {
        return Err(ValidationErrors::single(
            "role",
            "you cannot remove your own admin access",
        ));
    }
    Ok(())
}

/// GET /api/users
#[instrument(skip(state, _admin))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiQuery(filters): ApiQuery<UserFilters>,
) -> Result<Json<Page<Profile>>> {
    let page = state
        .profiles()
        .page(
            &filters.query()?,
            page_number(filters.page),
            state.config().page_size,
        )
        .await?;
    Ok(Json(page))
}

/// PATCH /api/users/{id}/role
#[instrument(skip_all, fields(admin_id = %admin.id, user_id = %id))]
pub async fn update_role(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<UserId>,
    ApiJson(change): ApiJson<RoleChange>,
) -> Result<Json<Profile>> {
    check_role_change(&admin, id, change.role)?;

    let patch = ProfilePatch {
        role: Some(change.role),
        ..ProfilePatch::default()
    };
    let profile = state.profiles().update(id, &patch).await?;
    info!(role = %profile.role, "User role changed");
    Ok(Json(profile))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use shopfront_backend::{AuthSession, AuthUser};

    use super::*;

    fn admin() -> CurrentAdmin {
        let id = UserId::generate();
        let session = AuthSession {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now().timestamp() + 3600,
            user: AuthUser {
                id,
                email: Some("ada@example.com".into()),
                email_confirmed_at: None,
                user_metadata: serde_json::json!({}),
                created_at: None,
            },
        };
        let profile = Profile {
            id,
            email: "ada@example.com".into(),
            full_name: Some("Ada".into()),
            phone: None,
            avatar_url: None,
            role: UserRole::Admin,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        CurrentAdmin::from_session(&session, &profile).unwrap()
    }

    #[test]
    fn test_admin_cannot_demote_themselves() {
        let admin = admin();
        let errors = check_role_change(&admin, admin.id, UserRole::Customer).unwrap_err();
        assert_eq!(
            errors.message_for("role"),
            Some("you cannot remove your own admin access")
        );
        assert!(check_role_change(&admin, admin.id, UserRole::Admin).is_ok());
    }

    #[test]
    fn test_admin_can_change_others() {
        let admin = admin();
        assert!(check_role_change(&admin, UserId::generate(), UserRole::Customer).is_ok());
        assert!(check_role_change(&admin, UserId::generate(), UserRole::Admin).is_ok());
    }

    #[test]
    fn test_user_filters() {
        let filters = UserFilters {
            q: Some("ada".into()),
            role: Some("admin".into()),
            page: Some(2),
        };
        let pairs = filters.query().unwrap().to_pairs();
        assert!(pairs.contains(&("role".to_string(), "eq.admin".to_string())));
        assert!(pairs.iter().any(|(k, v)| k == "or" && v.contains("email.ilike.*ada*")));
    }
}
