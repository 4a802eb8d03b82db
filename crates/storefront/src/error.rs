//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. Page handlers return `Result<T, AppError>`;
//! form handlers usually turn the error into a flash message with
//! [`AppError::user_message`] and redirect back instead.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use shopfront_backend::{BackendError, ErrorKind};
use shopfront_core::ValidationErrors;
use thiserror::Error;

use crate::services::CheckoutError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Hosted backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Submitted form failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Order could not be placed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Session store failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Standalone error page (does not extend the layout, so it renders even
/// when the layout's data could not be loaded).
#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    status: u16,
    title: &'a str,
    message: &'a str,
}

impl AppError {
    /// Category used for status and message mapping.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(e) | Self::Checkout(CheckoutError::Backend(e)) => e.kind(),
            Self::Checkout(_) => ErrorKind::InvalidData,
            Self::Validation(_) | Self::BadRequest(_) => ErrorKind::InvalidData,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthenticated,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Session(_) | Self::Template(_) | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::from_u16(self.kind().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Whether the failure is ours rather than the visitor's.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// Message safe to show to the visitor.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(errors) => describe_validation(errors),
            Self::Backend(e) | Self::Checkout(CheckoutError::Backend(e)) => e
                .validation_errors()
                .map_or_else(|| e.user_message().to_string(), describe_validation),
            Self::Checkout(e) => e.to_string(),
            Self::BadRequest(message) => message.clone(),
            other => other.kind().user_message().to_string(),
        }
    }
}

/// Turn field errors into one sentence per field, e.g. "Postal code is required."
#[must_use]
pub fn describe_validation(errors: &ValidationErrors) -> String {
    errors
        .errors()
        .iter()
        .map(|e| {
            let field = e.field.replace('_', " ");
            let mut chars = field.chars();
            let field = chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default();
            format!("{field} {}.", e.message)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let status = self.status();
        // Don't expose internal error details to clients
        let message = self.user_message();
        let page = ErrorTemplate {
            status: status.as_u16(),
            title: status.canonical_reason().unwrap_or("Error"),
            message: &message,
        };

        match page.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(_) => (status, message).into_response(),
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_string());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(get_status(AppError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(ValidationErrors::single("name", "is required").into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_backend_errors_map_by_kind() {
        let denied = AppError::Backend(BackendError::Api {
            status: 403,
            code: Some("42501".into()),
            message: "permission denied for table orders".into(),
            details: None,
            hint: None,
        });
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            denied.user_message(),
            "You do not have permission to perform this action."
        );

        let timeout = AppError::Backend(BackendError::Timeout(std::time::Duration::from_secs(15)));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(timeout.is_server_error());
    }

    #[test]
    fn test_checkout_errors_are_shown_verbatim() {
        let err = AppError::from(CheckoutError::InsufficientStock {
            name: "Sencha".into(),
            available: 2,
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.user_message(), "Only 2 of Sencha left in stock.");
    }

    #[test]
    fn test_internal_details_are_not_shown() {
        let err = AppError::Internal("db password rejected".into());
        assert!(!err.user_message().contains("password"));
    }

    #[test]
    fn test_describe_validation() {
        let mut v = shopfront_core::Validator::new();
        v.push("postal_code", "is required").push("email", "is not a valid email");
        let errors = v.finish().unwrap_err();
        assert_eq!(
            describe_validation(&errors),
            "Postal code is required. Email is not a valid email."
        );
    }
}
