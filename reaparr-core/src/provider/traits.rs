// Adapter capability traits
//
// The synchronizer and the lifecycle passes only ever see these traits;
// backends are interchangeable behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::models::{LibraryItem, MediaType};

/// A library (section) on the media server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLibrary {
    pub id: String,
    pub title: String,
    pub media_type: MediaType,
}

/// One watch-history event as reported by the media server. `account_id`
/// is the server's opaque viewer id; user import maps it to a user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub account_id: String,
    pub rating_key: String,
    pub media_type: MediaType,
    pub viewed_at: DateTime<Utc>,
    pub show_rating_key: Option<String>,
    pub show_title: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}

/// A viewer account on the media server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub account_id: String,
    pub name: String,
}

/// Media-server capability set
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn list_libraries(&self) -> Result<Vec<RemoteLibrary>>;

    async fn list_library_contents(&self, library_id: &str) -> Result<Vec<LibraryItem>>;

    /// Items added to `library_id` at or after `since`
    async fn list_recently_added(
        &self,
        library_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LibraryItem>>;

    async fn get_item(&self, rating_key: &str) -> Result<LibraryItem>;

    async fn list_children(&self, rating_key: &str) -> Result<Vec<LibraryItem>>;

    /// Watch events at or after `since`, newest last, at most `limit`
    async fn list_watch_history(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>>;

    /// Idempotent: deleting an absent item is success
    async fn delete_item(&self, rating_key: &str) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<RemoteUser>>;
}

/// A series known to the TV downloader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSeries {
    pub id: i64,
    pub title: String,
    pub tvdb_id: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
}

/// An episode known to the TV downloader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSeriesEpisode {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i32,
    pub episode_number: i32,
    pub monitored: bool,
    pub has_file: bool,
    pub episode_file_id: Option<i64>,
}

/// TV downloader capability set (episode acquisition and file removal)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TvDownloader: Send + Sync {
    async fn list_series(&self) -> Result<Vec<RemoteSeries>>;

    async fn list_episodes(&self, series_id: i64) -> Result<Vec<RemoteSeriesEpisode>>;

    async fn monitor_episodes(&self, episode_ids: &[i64], monitored: bool) -> Result<()>;

    /// Kick an episode search command; the downloader handles it async
    async fn search_episodes(&self, episode_ids: &[i64]) -> Result<()>;

    /// Idempotent: deleting an absent file is success
    async fn delete_episode_file(&self, episode_file_id: i64) -> Result<()>;
}

/// A movie known to the movie downloader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMovie {
    pub id: i64,
    pub title: String,
    pub tmdb_id: Option<i64>,
    pub has_file: bool,
}

/// Movie downloader capability set
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MovieDownloader: Send + Sync {
    async fn list_movies(&self) -> Result<Vec<RemoteMovie>>;

    /// Idempotent: deleting an absent movie is success
    async fn delete_movie(&self, movie_id: i64, delete_files: bool) -> Result<()>;

    async fn search_movie(&self, movie_id: i64) -> Result<()>;
}
