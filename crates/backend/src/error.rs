//! Backend errors and their classification into user-facing categories.
//!
//! The hosted platform reports failures as free text (Postgres messages
//! relayed by the REST layer, auth service errors, transport failures).
//! [`BackendError::kind`] maps every failure to an [`ErrorKind`] that decides
//! whether to retry and what to show the user.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shopfront_core::ValidationErrors;
use thiserror::Error;

/// Errors returned by every backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure (DNS, TLS, connection reset, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    /// The local timer fired before the backend answered.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body did not match the expected shape.
    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Input was rejected before it was sent.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// A lookup matched no rows.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Change-feed failure.
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// The operation needs the service-role key and none is configured.
    #[error("service role key is not configured")]
    MissingServiceKey,

    /// A background worker this call depends on has stopped.
    #[error("{0} is shut down")]
    Closed(&'static str),

    /// The same failure delivered to several callers of one shared request.
    #[error(transparent)]
    Shared(Arc<Self>),
}

/// User-facing category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyRecursion,
    PermissionDenied,
    Unauthenticated,
    Timeout,
    ForeignKey,
    Duplicate,
    InvalidData,
    NotFound,
    RateLimited,
    Network,
    Unknown,
}

/// Substring triggers in priority order; the first match wins.
const MESSAGE_RULES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::PolicyRecursion, &["infinite recursion"]),
    (
        ErrorKind::PermissionDenied,
        &["permission denied", "row-level security"],
    ),
    (
        ErrorKind::Unauthenticated,
        &["jwt expired", "invalid jwt", "not authenticated"],
    ),
    (ErrorKind::Timeout, &["timeout", "timed out"]),
    (ErrorKind::ForeignKey, &["foreign key"]),
    (
        ErrorKind::Duplicate,
        &["duplicate key", "unique constraint", "already exists", "already registered"],
    ),
    (
        ErrorKind::InvalidData,
        &["check constraint", "invalid input syntax", "violates not-null"],
    ),
    (ErrorKind::NotFound, &["not found"]),
    (ErrorKind::RateLimited, &["rate limit"]),
    (
        ErrorKind::Network,
        &["network", "connection", "fetch failed", "connect"],
    ),
];

impl ErrorKind {
    /// Stable snake_case name used in JSON error bodies.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyRecursion => "policy_recursion",
            Self::PermissionDenied => "permission_denied",
            Self::Unauthenticated => "unauthenticated",
            Self::Timeout => "timeout",
            Self::ForeignKey => "foreign_key",
            Self::Duplicate => "duplicate",
            Self::InvalidData => "invalid_data",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Only transient failures are worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }

    /// Message safe to show to a shopper or admin.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::PolicyRecursion => {
                "A data access policy is misconfigured. Please contact support."
            }
            Self::PermissionDenied => "You do not have permission to perform this action.",
            Self::Unauthenticated => "Your session has expired. Please sign in again.",
            Self::Timeout => "The request timed out. Please try again.",
            Self::ForeignKey => "This record is referenced by other data and cannot be changed.",
            Self::Duplicate => "A record with the same value already exists.",
            Self::InvalidData => "Some of the submitted data is invalid.",
            Self::NotFound => "The requested item could not be found.",
            Self::RateLimited => "Too many requests. Please wait a moment and try again.",
            Self::Network => "Unable to reach the server. Check your connection and try again.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }

    /// HTTP status an application should answer with for this category.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::PermissionDenied => 403,
            Self::Unauthenticated => 401,
            Self::Timeout => 504,
            Self::ForeignKey | Self::Duplicate => 409,
            Self::InvalidData => 422,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::Network => 502,
            Self::PolicyRecursion | Self::Unknown => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify free text by case-insensitive substring match.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    MESSAGE_RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map_or(ErrorKind::Unknown, |(kind, _)| *kind)
}

/// Classify an HTTP status, when the status alone is conclusive.
#[must_use]
pub const fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::Unauthenticated),
        403 => Some(ErrorKind::PermissionDenied),
        404 => Some(ErrorKind::NotFound),
        408 | 504 => Some(ErrorKind::Timeout),
        400 | 422 => Some(ErrorKind::InvalidData),
        409 => Some(ErrorKind::Duplicate),
        429 => Some(ErrorKind::RateLimited),
        502 | 503 => Some(ErrorKind::Network),
        _ => None,
    }
}

/// Classify a REST-layer or Postgres error code.
#[must_use]
pub fn classify_code(code: &str) -> Option<ErrorKind> {
    match code {
        "PGRST116" => Some(ErrorKind::NotFound),
        "PGRST301" | "PGRST302" => Some(ErrorKind::Unauthenticated),
        "42P17" => Some(ErrorKind::PolicyRecursion),
        "42501" => Some(ErrorKind::PermissionDenied),
        "23503" => Some(ErrorKind::ForeignKey),
        "23505" => Some(ErrorKind::Duplicate),
        "23502" | "23514" | "22P02" => Some(ErrorKind::InvalidData),
        "57014" => Some(ErrorKind::Timeout),
        _ => None,
    }
}

impl BackendError {
    /// Build an API error from a status and response body.
    ///
    /// Understands the REST layer's `{code, message, details, hint}` shape and
    /// the auth service's `{error, error_description}` / `{msg}` shapes; any
    /// other body is used verbatim as the message.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            code: Option<serde_json::Value>,
            message: Option<String>,
            msg: Option<String>,
            error: Option<String>,
            error_description: Option<String>,
            details: Option<String>,
            hint: Option<String>,
        }

        let parsed = serde_json::from_str::<Body>(body).ok();
        let Some(b) = parsed else {
            let message = if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.chars().take(500).collect()
            };
            return Self::Api {
                status,
                code: None,
                message,
                details: None,
                hint: None,
            };
        };

        let code = b.code.map(|c| match c {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        let message = b
            .message
            .or(b.msg)
            .or(b.error_description)
            .or(b.error)
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self::Api {
            status,
            code,
            message,
            details: b.details,
            hint: b.hint,
        }
    }

    /// Category of this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16()).unwrap_or(ErrorKind::Unknown)
                } else if e.is_decode() {
                    ErrorKind::Unknown
                } else {
                    ErrorKind::Network
                }
            }
            Self::Api {
                status,
                code,
                message,
                details,
                hint,
            } => {
                let text = [Some(message), details.as_ref(), hint.as_ref()]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                match classify_message(&text) {
                    ErrorKind::Unknown => code
                        .as_deref()
                        .and_then(classify_code)
                        .or_else(|| classify_status(*status))
                        .unwrap_or(ErrorKind::Unknown),
                    kind => kind,
                }
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Decode(_) | Self::MissingServiceKey | Self::Closed(_) => ErrorKind::Unknown,
            Self::Validation(_) => ErrorKind::InvalidData,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Realtime(message) => match classify_message(message) {
                ErrorKind::Unknown => ErrorKind::Network,
                kind => kind,
            },
            Self::Shared(inner) => inner.kind(),
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Whether the request never reached the server, so sending it again
    /// cannot apply it twice.
    #[must_use]
    pub fn is_unsent(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect(),
            Self::Shared(inner) => inner.is_unsent(),
            _ => false,
        }
    }

    /// Message safe to show to users.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    /// Field errors when this is a validation failure.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            Self::Shared(inner) => inner.validation_errors(),
            _ => None,
        }
    }

    /// Unwrap an error that may be shared between several waiters.
    #[must_use]
    pub fn from_shared(shared: Arc<Self>) -> Self {
        Arc::try_unwrap(shared).unwrap_or_else(Self::Shared)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>, message: &str) -> BackendError {
        BackendError::Api {
            status,
            code: code.map(Into::into),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn test_classify_message_table() {
        let cases = [
            (
                "infinite recursion detected in policy for relation \"profiles\"",
                ErrorKind::PolicyRecursion,
            ),
            ("new row violates row-level security policy", ErrorKind::PermissionDenied),
            ("permission denied for table orders", ErrorKind::PermissionDenied),
            ("JWT expired", ErrorKind::Unauthenticated),
            ("canceling statement due to statement timeout", ErrorKind::Timeout),
            ("update or delete violates foreign key constraint", ErrorKind::ForeignKey),
            (
                "duplicate key value violates unique constraint \"products_slug_key\"",
                ErrorKind::Duplicate,
            ),
            ("User already exists", ErrorKind::Duplicate),
            ("new row violates check constraint \"price_non_negative\"", ErrorKind::InvalidData),
            ("invalid input syntax for type uuid", ErrorKind::InvalidData),
            ("Resource not found", ErrorKind::NotFound),
            ("Email rate limit exceeded", ErrorKind::RateLimited),
            ("TypeError: fetch failed", ErrorKind::Network),
            ("connection refused", ErrorKind::Network),
            ("something odd", ErrorKind::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_message(message), expected, "{message}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both a timeout and a connection; timeout is listed first.
        assert_eq!(classify_message("connection timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_only_timeout_and_network_retry() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(!ErrorKind::Duplicate.is_retryable());
        assert!(!ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_api_error_falls_back_to_code_then_status() {
        let not_single = "JSON object requested, multiple (or no) rows returned";
        assert_eq!(api(406, Some("PGRST116"), not_single).kind(), ErrorKind::NotFound);
        assert_eq!(api(409, Some("23505"), "conflict").kind(), ErrorKind::Duplicate);
        assert_eq!(api(403, None, "nope").kind(), ErrorKind::PermissionDenied);
        assert_eq!(api(503, None, "upstream").kind(), ErrorKind::Network);
        assert_eq!(api(418, None, "teapot").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_message_beats_status() {
        assert_eq!(api(400, None, "JWT expired").kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_from_response_rest_shape() {
        let err = BackendError::from_response(
            409,
            r#"{"code":"23505","details":"Key (slug)=(shoes) already exists.","hint":null,
                "message":"duplicate key value violates unique constraint"}"#,
        );
        match &err {
            BackendError::Api { status, code, details, .. } => {
                assert_eq!(*status, 409);
                assert_eq!(code.as_deref(), Some("23505"));
                assert!(details.as_deref().unwrap().contains("slug"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(err.user_message(), "A record with the same value already exists.");
    }

    #[test]
    fn test_from_response_auth_shapes() {
        let err = BackendError::from_response(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let err =
            BackendError::from_response(422, r#"{"code":422,"msg":"User already registered"}"#);
        assert_eq!(err.to_string(), "User already registered");
    }

    #[test]
    fn test_from_response_plain_body() {
        let err = BackendError::from_response(502, "Bad Gateway");
        assert_eq!(err.to_string(), "Bad Gateway");
        assert!(err.is_retryable());
        assert_eq!(BackendError::from_response(500, "").to_string(), "HTTP 500");
    }

    #[test]
    fn test_local_variants() {
        assert_eq!(BackendError::Timeout(Duration::from_secs(15)).kind(), ErrorKind::Timeout);
        assert_eq!(BackendError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(BackendError::Realtime("socket closed".into()).kind(), ErrorKind::Network);
        let validation = BackendError::from(ValidationErrors::single("slug", "is required"));
        assert_eq!(validation.kind(), ErrorKind::InvalidData);
        assert!(validation.validation_errors().is_some());
    }

    #[test]
    fn test_shared_errors_keep_their_kind() {
        let shared = Arc::new(BackendError::Timeout(Duration::from_secs(1)));
        let keep = Arc::clone(&shared);
        let err = BackendError::from_shared(shared);
        assert!(matches!(err, BackendError::Shared(_)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        drop(keep);

        let sole = Arc::new(BackendError::NotFound("p".into()));
        assert!(matches!(BackendError::from_shared(sole), BackendError::NotFound(_)));
    }
}
