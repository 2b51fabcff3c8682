use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media-server item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Show,
    Season,
    Episode,
}

impl MediaType {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Some(Self::Movie),
            "show" | "series" => Some(Self::Show),
            "season" => Some(Self::Season),
            "episode" => Some(Self::Episode),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
        }
    }
}

/// External ids carried on media-server metadata guids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub tmdb: Option<i64>,
    pub tvdb: Option<i64>,
    pub imdb: Option<String>,
}

impl ExternalIds {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tmdb.is_none() && self.tvdb.is_none() && self.imdb.is_none()
    }
}

/// A media-server item currently known to the library cache.
///
/// Created by sync on first sighting, updated by sync, removed by sync once
/// the item has been absent past the removal quiet interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    pub rating_key: String,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub library_id: String,
    pub added_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub external_ids: ExternalIds,
    /// For episodes: the show's rating key and season/episode indices
    pub grandparent_rating_key: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}
