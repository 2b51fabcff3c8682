use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MediaType;

/// A title a user wants kept (or fetched) regardless of viewing progress,
/// until they start watching it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub user_id: String,
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub added_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Available,
}

impl RequestStatus {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "available" => Some(Self::Available),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Available => "available",
        }
    }
}

/// An acquisition request. Intake happens elsewhere; the synchronizer marks
/// requests available when the title shows up in the library, and the
/// watchlist-grace rule protects requested titles their requester has not
/// started watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRequest {
    pub user_id: String,
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub available_at: Option<DateTime<Utc>>,
}
