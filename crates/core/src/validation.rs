//! Field-level validation run before any write reaches the hosted backend.
//!
//! A [`Validator`] runs every rule it is given and collects all failures, so
//! a form can show each bad field at once rather than one per submission.
//!
//! ```
//! use shopfront_core::Validator;
//!
//! let mut v = Validator::new();
//! v.required("name", "")
//!     .slug("slug", "Not A Slug")
//!     .email("email", "ok@example.com");
//! let errors = v.finish().unwrap_err();
//! assert_eq!(errors.len(), 2);
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Email, Slug};

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ()\-.]{7,20}$").unwrap_or_else(|_| unreachable!()));

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").unwrap_or_else(|_| unreachable!()));

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Column or form field name.
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every failure collected by a [`Validator`]. Never empty.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("validation failed: {}", summary(.0))]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    /// Wrap a single failure.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    /// The collected failures.
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no failures were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First message recorded for `field`, if any.
    #[must_use]
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// Consume into the underlying list.
    #[must_use]
    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }
}

/// Implemented by every input form before it is written.
pub trait Validate {
    /// Run all checks.
    ///
    /// # Errors
    ///
    /// Returns every failed check.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

fn is_phone(value: &str) -> bool {
    PHONE_PATTERN.is_match(value) && value.chars().filter(char::is_ascii_digit).count() >= 7
}

/// Collects failures from independent field checks.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    /// Start an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure unconditionally.
    pub fn push(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    /// Record `message` when `ok` is false.
    pub fn check(&mut self, field: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            self.push(field, message);
        }
        self
    }

    /// Non-empty after trimming.
    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, !value.trim().is_empty(), "is required")
    }

    /// At least `min` characters.
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        self.check(
            field,
            value.chars().count() >= min,
            &format!("must be at least {min} characters"),
        )
    }

    /// At most `max` characters.
    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.check(
            field,
            value.chars().count() <= max,
            &format!("must be at most {max} characters"),
        )
    }

    /// Inclusive bounds for any ordered value (integers, decimals).
    pub fn range<T>(&mut self, field: &str, value: T, min: T, max: T) -> &mut Self
    where
        T: PartialOrd + fmt::Display,
    {
        let ok = value >= min && value <= max;
        self.check(field, ok, &format!("must be between {min} and {max}"))
    }

    /// Zero or more.
    pub fn non_negative(&mut self, field: &str, value: Decimal) -> &mut Self {
        self.check(
            field,
            !value.is_sign_negative() || value.is_zero(),
            "cannot be negative",
        )
    }

    /// Zero or more, for integer columns such as stock.
    pub fn non_negative_int(&mut self, field: &str, value: i64) -> &mut Self {
        self.check(field, value >= 0, "cannot be negative")
    }

    /// Well-formed slug.
    pub fn slug(&mut self, field: &str, value: &str) -> &mut Self {
        if let Err(e) = Slug::parse(value) {
            self.push(field, e.to_string());
        }
        self
    }

    /// Well-formed email address.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            Email::parse(value).is_ok(),
            "must be a valid email address",
        )
    }

    /// Phone number with 7-20 characters and at least 7 digits.
    pub fn phone(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, is_phone(value), "must be a valid phone number")
    }

    /// Absolute http(s) URL.
    pub fn url(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            URL_PATTERN.is_match(value),
            "must be a valid http(s) URL",
        )
    }

    /// Value is one of the allowed strings.
    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        self.check(
            field,
            allowed.contains(&value),
            &format!("must be one of: {}", allowed.join(", ")),
        )
    }

    /// Run `check` only when a value is present.
    pub fn optional<T, F>(&mut self, value: Option<T>, check: F) -> &mut Self
    where
        F: FnOnce(&mut Self, T),
    {
        if let Some(v) = value {
            check(self, v);
        }
        self
    }

    /// Whether nothing has failed so far.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Finish, returning all collected failures.
    ///
    /// # Errors
    ///
    /// Returns `ValidationErrors` if any check failed.
    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_failures_reported() {
        let mut v = Validator::new();
        v.required("name", "  ")
            .min_len("password", "abc", 8)
            .non_negative("price", Decimal::from(-1))
            .range("rating", 6, 1, 5)
            .email("email", "nope");
        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 5);
        assert_eq!(errors.message_for("rating"), Some("must be between 1 and 5"));
        assert_eq!(errors.message_for("price"), Some("cannot be negative"));
    }

    #[test]
    fn test_passing_checks() {
        let mut v = Validator::new();
        v.required("name", "Shoes")
            .slug("slug", "shoes")
            .phone("phone", "+1 (555) 123-4567")
            .url("image_url", "https://cdn.example.com/a.png")
            .one_of("sort", "newest", &["newest", "name"])
            .non_negative_int("stock", 0);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_phone_needs_digits() {
        let mut v = Validator::new();
        v.phone("phone", "(--) ---");
        assert!(v.finish().is_err());
    }

    #[test]
    fn test_optional_skips_none() {
        let mut v = Validator::new();
        v.optional(None::<&str>, |v, s| {
            v.email("email", s);
        });
        assert!(v.is_valid());
    }

    #[test]
    fn test_display_lists_every_field() {
        let mut v = Validator::new();
        v.required("a", "").required("b", "");
        let err = v.finish().unwrap_err();
        assert_eq!(err.to_string(), "validation failed: a: is required; b: is required");
    }

    #[test]
    fn test_serializes_as_list() {
        let err = ValidationErrors::single("slug", "taken");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!([{ "field": "slug", "message": "taken" }])
        );
    }
}
