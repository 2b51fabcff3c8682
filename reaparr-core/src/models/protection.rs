use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    ManualProtection,
}

impl ExclusionKind {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual_protection" => Some(Self::ManualProtection),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ManualProtection => "manual_protection",
        }
    }
}

/// Presence of an exclusion means the title is never safe to delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionExclusion {
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub kind: ExclusionKind,
    pub created_at: DateTime<Utc>,
}
