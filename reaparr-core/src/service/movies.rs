//! Movie cleanup pass
//!
//! Movies have no buffer math: a movie goes once nobody's watchlist or a
//! manual protection claims it, and it has either been watched and cooled
//! off or sat unwatched past the retention window. Deletions cascade to
//! the movie downloader with file removal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{LibraryItem, LifecycleSettings, MediaType};
use crate::provider::{MediaServer, MovieDownloader};
use crate::repository::{
    LibraryItemRepository, LifecycleRepository, ProtectionRepository, SettingsRepository,
    WatchlistRepository,
};
use crate::transaction::UnitOfWork;
use crate::Result;

/// Why one movie may be removed
#[must_use]
pub fn movie_deletion_reason(
    movie: &LibraryItem,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> Option<String> {
    if movie.view_count > 0 {
        let last_viewed = movie.last_viewed_at?;
        let days = (now - last_viewed).num_days();
        if days >= settings.min_days_since_watch {
            return Some(format!("Watched {days} days ago"));
        }
        return None;
    }
    let added = movie.added_at?;
    let days = (now - added).num_days();
    if days > settings.unwatched_movie_retention_days {
        return Some(format!("Unwatched for {days} days"));
    }
    None
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MovieCleanupSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub movies_checked: usize,
    pub movies_deleted: usize,
    pub protected: usize,
    pub errors: usize,
}

pub struct MovieCleanupService {
    library: LibraryItemRepository,
    lifecycle: LifecycleRepository,
    watchlist: WatchlistRepository,
    protection: ProtectionRepository,
    settings: SettingsRepository,
    media_server: Arc<dyn MediaServer>,
    movies: Option<Arc<dyn MovieDownloader>>,
    pool: sqlx::PgPool,
    clock: Clock,
    pacing: Duration,
}

impl MovieCleanupService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        library: LibraryItemRepository,
        lifecycle: LifecycleRepository,
        watchlist: WatchlistRepository,
        protection: ProtectionRepository,
        settings: SettingsRepository,
        media_server: Arc<dyn MediaServer>,
        movies: Option<Arc<dyn MovieDownloader>>,
        pool: sqlx::PgPool,
        clock: Clock,
        pacing: Duration,
    ) -> Self {
        Self {
            library,
            lifecycle,
            watchlist,
            protection,
            settings,
            media_server,
            movies,
            pool,
            clock,
            pacing,
        }
    }

    pub async fn run(&self, dry_run: bool) -> Result<MovieCleanupSummary> {
        let now = self.clock.now();
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        let mut summary = MovieCleanupSummary {
            timestamp: Some(now),
            dry_run,
            ..MovieCleanupSummary::default()
        };

        if !settings.enabled {
            info!("lifecycle analysis disabled, skipping movie cleanup");
            return Ok(summary);
        }

        let downloader_index = self.load_downloader_index().await;

        for movie in self.library.list_by_type(MediaType::Movie).await? {
            summary.movies_checked += 1;

            let tmdb_id = match movie.external_ids.tmdb {
                Some(tmdb) => Some(tmdb),
                None => self
                    .lifecycle
                    .find_by_rating_key(&movie.rating_key)
                    .await?
                    .map(|r| r.tmdb_id),
            };

            if let Some(tmdb) = tmdb_id {
                if self.protection.exists(tmdb, MediaType::Movie).await? {
                    summary.protected += 1;
                    continue;
                }
                if !self
                    .watchlist
                    .list_active_for(tmdb, MediaType::Movie)
                    .await?
                    .is_empty()
                {
                    summary.protected += 1;
                    continue;
                }
            }

            let Some(reason) = movie_deletion_reason(&movie, now, &settings) else {
                continue;
            };

            if dry_run {
                debug!(title = %movie.title, reason, "movie eligible for deletion (dry run)");
                summary.movies_deleted += 1;
                continue;
            }

            match self
                .delete_movie(&movie, tmdb_id, downloader_index.as_ref(), now)
                .await
            {
                Ok(()) => {
                    info!(title = %movie.title, reason, "movie removed");
                    summary.movies_deleted += 1;
                }
                Err(e) => {
                    warn!(title = %movie.title, error = %e, "movie deletion failed");
                    summary.errors += 1;
                }
            }
            tokio::time::sleep(self.pacing).await;
        }

        info!(
            checked = summary.movies_checked,
            deleted = summary.movies_deleted,
            protected = summary.protected,
            dry_run,
            "movie cleanup complete"
        );
        Ok(summary)
    }

    async fn load_downloader_index(&self) -> Option<HashMap<i64, i64>> {
        let movies = self.movies.as_ref()?;
        match movies.list_movies().await {
            Ok(list) => Some(
                list.into_iter()
                    .filter_map(|m| m.tmdb_id.map(|tmdb| (tmdb, m.id)))
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "movie listing failed, deleting through the media server");
                None
            }
        }
    }

    async fn delete_movie(
        &self,
        movie: &LibraryItem,
        tmdb_id: Option<i64>,
        downloader_index: Option<&HashMap<i64, i64>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let downloader_id = tmdb_id
            .zip(downloader_index)
            .and_then(|(tmdb, index)| index.get(&tmdb).copied());

        match (self.movies.as_ref(), downloader_id) {
            (Some(downloader), Some(id)) => downloader.delete_movie(id, true).await?,
            _ => self.media_server.delete_item(&movie.rating_key).await?,
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        self.library
            .delete_tx(uow.transaction()?, &movie.rating_key)
            .await?;
        if let Some(tmdb) = tmdb_id {
            self.lifecycle
                .mark_deleted_tx(uow.transaction()?, tmdb, MediaType::Movie, now)
                .await?;
        }
        uow.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalIds;
    use chrono::Duration as ChronoDuration;

    fn movie(view_count: i64, last_viewed_days: Option<i64>, added_days: i64, now: DateTime<Utc>) -> LibraryItem {
        LibraryItem {
            rating_key: "m1".to_string(),
            title: "Movie".to_string(),
            year: Some(2020),
            media_type: MediaType::Movie,
            library_id: "1".to_string(),
            added_at: Some(now - ChronoDuration::days(added_days)),
            updated_at: None,
            view_count,
            last_viewed_at: last_viewed_days.map(|d| now - ChronoDuration::days(d)),
            external_ids: ExternalIds::default(),
            grandparent_rating_key: None,
            season_number: None,
            episode_number: None,
        }
    }

    #[test]
    fn watched_movie_goes_after_cooling_off() {
        let now = Utc::now();
        let settings = LifecycleSettings::default();
        assert!(movie_deletion_reason(&movie(2, Some(20), 200, now), now, &settings).is_some());
        assert!(movie_deletion_reason(&movie(2, Some(3), 200, now), now, &settings).is_none());
    }

    #[test]
    fn unwatched_movie_goes_after_retention_window() {
        let now = Utc::now();
        let settings = LifecycleSettings::default();
        assert!(movie_deletion_reason(&movie(0, None, 120, now), now, &settings).is_some());
        assert!(movie_deletion_reason(&movie(0, None, 30, now), now, &settings).is_none());
    }
}
