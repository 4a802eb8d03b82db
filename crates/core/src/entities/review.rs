//! Product reviews.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Entity;
use crate::types::{ProductId, ReviewId, UserId};
use crate::validation::{Validate, ValidationErrors, Validator};

const MIN_RATING: i16 = 1;
const MAX_RATING: i16 = 5;
const MAX_BODY: usize = 2000;

/// A row of `reviews`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub rating: i16,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub author_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Rating clamped into 1..=5 for star rendering.
    #[must_use]
    pub fn stars(&self) -> u8 {
        u8::try_from(self.rating.clamp(MIN_RATING, MAX_RATING)).unwrap_or(1)
    }
}

/// Mean rating rounded to one decimal place, or `None` with no reviews.
#[must_use]
pub fn average_rating(reviews: &[Review]) -> Option<Decimal> {
    if reviews.is_empty() {
        return None;
    }
    let sum: i64 = reviews.iter().map(|r| i64::from(r.rating)).sum();
    let count = i64::try_from(reviews.len()).ok()?;
    Some((Decimal::from(sum) / Decimal::from(count)).round_dp(1))
}

impl Entity for Review {
    type Id = ReviewId;
    type New = NewReview;
    type Patch = ReviewPatch;

    const TABLE: &'static str = "reviews";
    const REQUIRED_FIELDS: &'static [&'static str] = &["product_id", "user_id", "rating", "body"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("productId", "product_id"),
        ("userId", "user_id"),
        ("authorName", "author_name"),
    ];

    fn id(&self) -> ReviewId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub product_id: ProductId,
    pub user_id: UserId,
    pub rating: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Validate for NewReview {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.range("rating", self.rating, MIN_RATING, MAX_RATING)
            .required("body", &self.body)
            .max_len("body", &self.body, MAX_BODY)
            .optional(self.title.as_deref(), |v, t| {
                v.max_len("title", t, 120);
            });
        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Validate for ReviewPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.rating, |v, r| {
            v.range("rating", r, MIN_RATING, MAX_RATING);
        })
        .optional(self.body.as_deref(), |v, b| {
            v.required("body", b).max_len("body", b, MAX_BODY);
        });
        v.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn review(rating: i16) -> Review {
        Review {
            id: ReviewId::generate(),
            product_id: ProductId::generate(),
            user_id: UserId::generate(),
            rating,
            title: None,
            body: "Great".into(),
            author_name: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rating_bounds() {
        let mut input = NewReview {
            product_id: ProductId::generate(),
            user_id: UserId::generate(),
            rating: 0,
            title: None,
            body: "Nice".into(),
            author_name: None,
        };
        assert!(input.validate().is_err());
        input.rating = 6;
        assert!(input.validate().is_err());
        input.rating = 5;
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_average_rating() {
        assert_eq!(average_rating(&[]), None);
        let avg = average_rating(&[review(5), review(4), review(4)]).unwrap();
        assert_eq!(avg.to_string(), "4.3");
    }

    #[test]
    fn test_stars_clamped() {
        assert_eq!(review(9).stars(), 5);
        assert_eq!(review(-1).stars(), 1);
    }
}
