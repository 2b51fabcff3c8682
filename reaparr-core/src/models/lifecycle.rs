use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Pending,
    Available,
    Deleted,
}

impl LifecycleStatus {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "available" => Some(Self::Available),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Deleted => "deleted",
        }
    }
}

/// Maps `(tmdb_id, media_type)` to the media server's rating key and tracks
/// whether the title is currently present in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub rating_key: Option<String>,
    pub title: String,
    pub status: LifecycleStatus,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
