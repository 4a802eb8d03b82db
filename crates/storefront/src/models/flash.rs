//! One-shot messages shown on the next rendered page.

use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use super::session_keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Info,
    Error,
}

impl FlashLevel {
    /// CSS modifier used by the templates.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }

    /// Store for the next page view. Session failures are logged, not raised.
    pub async fn set(self, session: &Session) {
        if let Err(e) = session.insert(session_keys::FLASH, self).await {
            tracing::warn!(error = %e, "Failed to store flash message");
        }
    }

    /// Remove and return the pending message.
    pub async fn take(session: &Session) -> Option<Self> {
        session.remove::<Self>(session_keys::FLASH).await.ok().flatten()
    }
}
