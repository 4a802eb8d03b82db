//! Per-request data every full page needs for the shared layout.

use axum::{extract::FromRequestParts, http::request::Parts};
use shopfront_core::Category;
use tower_sessions::Session;

use super::auth::OptionalAuth;
use super::csp::CspNonce;
use crate::models::{Cart, CompareList, CurrentUser, Flash, session_keys};
use crate::state::AppState;

/// Layout context: nonce, signed-in user, pending flash, badge counts and
/// the category menu.
///
/// Extracting this consumes the pending flash message, so take it only in
/// handlers that render a page.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub nonce: String,
    pub user: Option<CurrentUser>,
    pub flash: Option<Flash>,
    pub cart_count: u32,
    pub compare_count: usize,
    pub categories: Vec<Category>,
    pub path: String,
}

impl PageContext {
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    /// Greeting name for the header.
    #[must_use]
    pub fn user_name(&self) -> &str {
        self.user.as_ref().map_or("", CurrentUser::display_name)
    }

    /// Whether `prefix` is the current section, for nav highlighting.
    #[must_use]
    pub fn is_active(&self, prefix: &str) -> bool {
        if prefix == "/" {
            self.path == "/"
        } else {
            self.path.starts_with(prefix)
        }
    }

    /// Whether the current page is the listing of category `slug`.
    #[must_use]
    pub fn in_category(&self, slug: &str) -> bool {
        self.path
            .strip_prefix("/categories/")
            .is_some_and(|rest| rest == slug)
    }
}

impl FromRequestParts<AppState> for PageContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CspNonce(nonce) = CspNonce::from_request_parts(parts, state).await?;
        let OptionalAuth(user) = OptionalAuth::from_request_parts(parts, state).await?;

        let mut context = Self {
            nonce,
            user,
            path: parts.uri.path().to_string(),
            ..Self::default()
        };

        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            context.flash = Flash::take(&session).await;
            context.cart_count = session
                .get::<Cart>(session_keys::CART)
                .await
                .ok()
                .flatten()
                .map_or(0, |c| c.item_count());
            context.compare_count = session
                .get::<CompareList>(session_keys::COMPARE)
                .await
                .ok()
                .flatten()
                .map_or(0, |c| c.len());
        }

        context.categories = state.catalog().categories().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Category menu unavailable");
            Vec::new()
        });

        Ok(context)
    }
}
