//! User profiles and address book.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Entity;
use crate::types::{AddressId, UserId, UserRole};
use crate::validation::{Validate, ValidationErrors, Validator};

/// A row of `profiles`, keyed by the auth user's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Full name, falling back to the email's local part.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.email.split('@').next().unwrap_or(&self.email))
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl Entity for Profile {
    type Id = UserId;
    type New = NewProfile;
    type Patch = ProfilePatch;

    const TABLE: &'static str = "profiles";
    const REQUIRED_FIELDS: &'static [&'static str] = &["id", "email"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("fullName", "full_name"),
        ("avatarUrl", "avatar_url"),
    ];

    fn id(&self) -> UserId {
        self.id
    }
}

/// Insert form for `profiles`. Normally the row is created by a database
/// trigger on sign-up; this form backs the seeding tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl Validate for NewProfile {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.email("email", &self.email)
            .optional(self.full_name.as_deref(), |v, n| {
                v.max_len("full_name", n, 120);
            });
        v.finish()
    }
}

/// Partial update for `profiles`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

impl Validate for ProfilePatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.full_name.as_deref(), |v, n| {
            v.max_len("full_name", n, 120);
        })
        .optional(self.phone.as_deref().filter(|p| !p.is_empty()), |v, p| {
            v.phone("phone", p);
        })
        .optional(self.avatar_url.as_deref(), |v, u| {
            v.url("avatar_url", u);
        });
        v.finish()
    }
}

// =============================================================================
// Address
// =============================================================================

/// A row of `addresses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    #[serde(default)]
    pub label: Option<String>,
    pub full_name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    /// One-line rendering for lists.
    #[must_use]
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.line1.as_str()];
        if let Some(line2) = self.line2.as_deref().filter(|l| !l.is_empty()) {
            parts.push(line2);
        }
        parts.push(&self.city);
        if let Some(state) = self.state.as_deref().filter(|s| !s.is_empty()) {
            parts.push(state);
        }
        parts.push(&self.postal_code);
        parts.push(&self.country);
        parts.join(", ")
    }
}

impl Entity for Address {
    type Id = AddressId;
    type New = NewAddress;
    type Patch = AddressPatch;

    const TABLE: &'static str = "addresses";
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["user_id", "full_name", "line1", "city", "postal_code", "country"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("userId", "user_id"),
        ("fullName", "full_name"),
        ("addressLine1", "line1"),
        ("addressLine2", "line2"),
        ("postalCode", "postal_code"),
        ("zip", "postal_code"),
        ("isDefault", "is_default"),
    ];

    fn id(&self) -> AddressId {
        self.id
    }
}

/// Insert form for `addresses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub full_name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Validate for NewAddress {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.required("full_name", &self.full_name)
            .required("line1", &self.line1)
            .required("city", &self.city)
            .required("postal_code", &self.postal_code)
            .max_len("postal_code", &self.postal_code, 16)
            .required("country", &self.country)
            .optional(self.phone.as_deref().filter(|p| !p.is_empty()), |v, p| {
                v.phone("phone", p);
            });
        v.finish()
    }
}

/// Partial update for `addresses`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl Validate for AddressPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        for (field, value) in [
            ("full_name", &self.full_name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ] {
            v.optional(value.as_deref(), |v, s| {
                v.required(field, s);
            });
        }
        v.optional(self.phone.as_deref().filter(|p| !p.is_empty()), |v, p| {
            v.phone("phone", p);
        });
        v.finish()
    }
}
