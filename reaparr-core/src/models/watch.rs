use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MediaType;

/// Immutable per-view record, appended by the watch-history sub-pass.
/// Unique on `(user_id, rating_key, watched_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub user_id: String,
    pub rating_key: String,
    pub media_type: MediaType,
    pub show_title: Option<String>,
    pub show_rating_key: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub watched_at: DateTime<Utc>,
}

impl WatchEvent {
    #[must_use]
    pub const fn is_episode(&self) -> bool {
        matches!(self.media_type, MediaType::Episode)
    }
}
