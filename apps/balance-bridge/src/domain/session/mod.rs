//! Session Token
//!
//! The credential-scoped handle ("listen key") that authorizes the private
//! user-data stream. Tokens are superseded on renewal, never mutated.

use chrono::{DateTime, Utc};

/// A listen key and the time it was issued or last extended.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    issued_at: DateTime<Utc>,
}

impl SessionToken {
    /// Create a token issued now.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self::issued_at(value, Utc::now())
    }

    /// Create a token with an explicit issue time.
    #[must_use]
    pub fn issued_at(value: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }

    /// The listen key value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the token was issued or last extended.
    #[must_use]
    pub const fn issued(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Same value, fresh issue time (server-side validity was extended).
    #[must_use]
    pub fn extended(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &redact(&self.value))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Keep the first few characters of a listen key for log correlation.
fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(6).collect();
    format!("{prefix}…")
}
