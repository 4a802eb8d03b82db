//! Unified error handling for the admin API.
//!
//! Every failure is answered with a JSON body:
//!
//! ```json
//! { "error": "invalid_data", "message": "Some of the submitted data is invalid.",
//!   "fields": [{ "field": "price", "message": "must not be negative" }] }
//! ```
//!
//! Server-side failures are captured to Sentry and never echo internal
//! details back to the client.

use axum::{
    Json,
    extract::multipart::MultipartError,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use shopfront_backend::{BackendError, ErrorKind};
use shopfront_core::{FieldError, ValidationErrors};
use thiserror::Error;

/// Application-level error type for the admin API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Hosted backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Request body failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Session store failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Multipart body could not be read.
    #[error("Upload error: {0}")]
    Multipart(#[from] MultipartError),

    /// JSON body could not be parsed.
    #[error("Invalid JSON body: {0}")]
    Json(#[from] JsonRejection),

    /// Query string could not be parsed.
    #[error("Invalid query: {0}")]
    Query(#[from] QueryRejection),

    /// Path parameter could not be parsed.
    #[error("Invalid path: {0}")]
    Path(#[from] PathRejection),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not signed in.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Signed in without the admin role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub fields: Vec<FieldError>,
}

impl AppError {
    /// Category used for status and message mapping.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(e) => e.kind(),
            Self::Validation(_)
            | Self::BadRequest(_)
            | Self::Multipart(_)
            | Self::Json(_)
            | Self::Query(_)
            | Self::Path(_) => ErrorKind::InvalidData,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthenticated,
            Self::Forbidden(_) => ErrorKind::PermissionDenied,
            Self::Session(_) | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::Multipart(_)
            | Self::Json(_)
            | Self::Query(_)
            | Self::Path(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::from_u16(self.kind().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Field-level problems, if any.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldError> {
        match self {
            Self::Validation(errors) => errors.errors().to_vec(),
            Self::Backend(e) => e
                .validation_errors()
                .map(|errors| errors.errors().to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Message safe to show in the console.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest(message) | Self::Forbidden(message) | Self::Unauthorized(message) => {
                message.clone()
            }
            Self::NotFound(what) => format!("{what} was not found."),
            Self::Json(rejection) => rejection.body_text(),
            Self::Query(rejection) => rejection.body_text(),
            Self::Path(rejection) => rejection.body_text(),
            other => other.kind().user_message().to_string(),
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().as_str(),
            message: self.user_message(),
            fields: self.fields(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Admin request error"
            );
        } else {
            tracing::debug!(error = %self, "Admin request rejected");
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from an admin's user ID.
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
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
