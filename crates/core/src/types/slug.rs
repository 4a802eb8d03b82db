//! URL slug type used by products, categories and collections.

use core::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap_or_else(|_| unreachable!())
});

/// Errors that can occur when parsing a [`Slug`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SlugError {
    /// The input string is empty.
    #[error("slug cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("slug must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains characters other than lowercase letters, digits and
    /// single hyphens between words.
    #[error("slug may only contain lowercase letters, numbers and single hyphens")]
    InvalidFormat,
}

/// A URL-safe identifier such as `summer-dresses`.
///
/// Uniqueness per table is enforced by the hosted database; this type only
/// guarantees the format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Maximum length of a slug.
    pub const MAX_LENGTH: usize = 100;

    /// Parse a `Slug` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, too long, or malformed.
    pub fn parse(s: &str) -> Result<Self, SlugError> {
        if s.is_empty() {
            return Err(SlugError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(SlugError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if !SLUG_PATTERN.is_match(s) {
            return Err(SlugError::InvalidFormat);
        }
        Ok(Self(s.to_owned()))
    }

    /// Derive a slug from a free-form title.
    ///
    /// Non-alphanumeric runs collapse into a single hyphen and the result is
    /// truncated to [`Self::MAX_LENGTH`].
    ///
    /// # Errors
    ///
    /// Returns `SlugError::Empty` if the title has no alphanumeric characters.
    pub fn from_title(title: &str) -> Result<Self, SlugError> {
        let mut out = String::with_capacity(title.len());
        let mut pending_hyphen = false;

        for c in title.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_hyphen && !out.is_empty() {
                    out.push('-');
                }
                pending_hyphen = false;
                out.push(c.to_ascii_lowercase());
            } else {
                pending_hyphen = true;
            }
        }

        out.truncate(Self::MAX_LENGTH);
        let trimmed = out.trim_end_matches('-');
        Self::parse(trimmed)
    }

    /// Returns the slug as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returns true if the value is a well-formed slug.
#[must_use]
pub fn is_valid_slug(value: &str) -> bool {
    Slug::parse(value).is_ok()
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        assert!(Slug::parse("shoes").is_ok());
        assert!(Slug::parse("summer-dresses-2024").is_ok());
        assert!(Slug::parse("a1").is_ok());
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Slug::parse(""), Err(SlugError::Empty));
        assert_eq!(Slug::parse("Shoes"), Err(SlugError::InvalidFormat));
        assert_eq!(Slug::parse("-shoes"), Err(SlugError::InvalidFormat));
        assert_eq!(Slug::parse("shoes-"), Err(SlugError::InvalidFormat));
        assert_eq!(Slug::parse("red--shoes"), Err(SlugError::InvalidFormat));
        assert_eq!(Slug::parse("red shoes"), Err(SlugError::InvalidFormat));
        assert!(matches!(
            Slug::parse(&"a".repeat(101)),
            Err(SlugError::TooLong { max: 100 })
        ));
    }

    #[test]
    fn test_from_title() {
        let slug = Slug::from_title("  Men's Running Shoes (2024) ").unwrap();
        assert_eq!(slug.as_str(), "men-s-running-shoes-2024");
    }

    #[test]
    fn test_from_title_without_alphanumerics() {
        assert_eq!(Slug::from_title("!!!"), Err(SlugError::Empty));
    }

    #[test]
    fn test_from_title_truncates() {
        let title = "word ".repeat(60);
        let slug = Slug::from_title(&title).unwrap();
        assert!(slug.as_str().len() <= Slug::MAX_LENGTH);
        assert!(!slug.as_str().ends_with('-'));
    }
}
