//! Time source for services and decision logic.
//!
//! Every pass takes a `Clock` instead of calling `Utc::now()` inline so the
//! lifecycle rules can be exercised against a pinned instant in tests.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }

    /// A clock pinned to `at`. Used by tests and dry-run previews.
    #[must_use]
    pub const fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}
