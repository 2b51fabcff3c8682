use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Position;

/// Per-episode analysis outcome, keyed on
/// `(show_rating_key, season_number, episode_number)`.
///
/// Rows are kept after deletion so the history of what was removed and why
/// remains auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub show_rating_key: String,
    pub show_title: String,
    pub season_number: i32,
    pub episode_number: i32,
    pub velocity_position: Position,
    pub is_available: bool,
    pub safe_to_delete: bool,
    pub deletion_reason: Option<String>,
    /// Users whose current position is at or past this episode
    pub users_beyond: Vec<String>,
    /// Users still approaching this episode
    pub users_approaching: Vec<String>,
    pub last_analyzed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_cleanup: bool,
}
