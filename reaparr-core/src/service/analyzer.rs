//! Lifecycle analyzer service
//!
//! Loads per-show state, runs the decision rules, persists episode stats,
//! and carries out deletions through the downloader (falling back to the
//! media server for shows the downloader does not track).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{
    LibraryItem, LifecycleSettings, MediaRequest, MediaType, Position, WatchlistEntry,
};
use crate::provider::{MediaServer, TvDownloader};
use crate::repository::{
    EpisodeStatsRepository, LibraryItemRepository, LifecycleRepository, MediaRequestRepository,
    MediaUserRepository, ProtectionRepository, SettingsRepository, UserVelocityRepository,
    WatchlistRepository,
};
use crate::service::decision::{
    decide_episode, redownload_need, EpisodeState, GraceEntry, GraceInput, ShowSnapshot,
    ViewerState,
};
use crate::service::queue::{EpisodeFetchRequest, RedownloadQueue};
use crate::service::redownload::SeriesIndex;
use crate::models::EpisodeStats;
use crate::Result;

/// State shared by every show in one analyzer run
pub struct RunContext {
    pub watchlist: Vec<WatchlistEntry>,
    pub requests: Vec<MediaRequest>,
    pub user_names: HashMap<String, String>,
    /// Watchlist/request load failed: every show is grace-protected
    pub grace_unavailable: bool,
}

/// Assembles `ShowSnapshot`s from the state store
#[derive(Clone)]
pub struct SnapshotLoader {
    pub library: LibraryItemRepository,
    pub velocities: UserVelocityRepository,
    pub watchlist: WatchlistRepository,
    pub requests: MediaRequestRepository,
    pub protection: ProtectionRepository,
    pub lifecycle: LifecycleRepository,
    pub users: MediaUserRepository,
}

impl SnapshotLoader {
    /// Load the run-wide context. Watchlist/request failures do not abort
    /// the run; they flip the fail-safe flag instead.
    pub async fn load_run_context(&self) -> Result<RunContext> {
        let user_names = self
            .users
            .list()
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        let (watchlist, requests, grace_unavailable) =
            match (self.watchlist.list_active().await, self.requests.list_all().await) {
                (Ok(watchlist), Ok(requests)) => (watchlist, requests, false),
                (watchlist, requests) => {
                    if let Err(e) = &watchlist {
                        warn!(error = %e, "failed to load watchlist, failing safe");
                    }
                    if let Err(e) = &requests {
                        warn!(error = %e, "failed to load requests, failing safe");
                    }
                    (Vec::new(), Vec::new(), true)
                }
            };

        Ok(RunContext {
            watchlist,
            requests,
            user_names,
            grace_unavailable,
        })
    }

    /// TMDB id for a show: metadata external id first, then the lifecycle
    /// record keyed by rating key.
    pub async fn show_tmdb_id(&self, show: &LibraryItem) -> Result<Option<i64>> {
        if let Some(tmdb) = show.external_ids.tmdb {
            return Ok(Some(tmdb));
        }
        Ok(self
            .lifecycle
            .find_by_rating_key(&show.rating_key)
            .await?
            .map(|r| r.tmdb_id)
            .filter(|id| *id != 0))
    }

    pub async fn load_show_snapshot(
        &self,
        show: &LibraryItem,
        ctx: &RunContext,
    ) -> Result<ShowSnapshot> {
        let tmdb_id = self.show_tmdb_id(show).await?;

        let manually_protected = match tmdb_id {
            Some(tmdb) => self.protection.exists(tmdb, MediaType::Show).await?,
            None => false,
        };

        // Velocity rows may be keyed by rating key or by the title-hash
        // fallback; collect both and dedupe per user.
        let mut viewers_by_user: HashMap<String, ViewerState> = HashMap::new();
        let hash_key = crate::models::resolve_show_key(None, &show.title);
        for key in [show.rating_key.as_str(), hash_key.as_str()] {
            for row in self.velocities.list_for_show(key).await? {
                let name = ctx
                    .user_names
                    .get(&row.user_id)
                    .cloned()
                    .unwrap_or_else(|| row.user_id.clone());
                viewers_by_user
                    .entry(row.user_id.clone())
                    .and_modify(|existing| {
                        if row.current_position > existing.current_position {
                            existing.current_position = row.current_position;
                        }
                    })
                    .or_insert(ViewerState {
                        user_id: row.user_id,
                        user_name: name,
                        current_position: row.current_position,
                        velocity: row.episodes_per_day,
                        episodes_watched: row.episodes_watched,
                        last_watched_at: row.last_watched_at,
                    });
            }
        }
        let viewers: Vec<ViewerState> = viewers_by_user.into_values().collect();

        let grace = if ctx.grace_unavailable {
            GraceInput::Unavailable
        } else {
            GraceInput::Known(grace_entries(tmdb_id, ctx, &viewers))
        };

        let mut episodes = Vec::new();
        for item in self.library.list_show_episodes(&show.rating_key).await? {
            let (Some(season), Some(number)) = (item.season_number, item.episode_number) else {
                debug!(rating_key = %item.rating_key, "episode without season/episode index, skipping");
                continue;
            };
            let position = match Position::new(season, number) {
                Ok(position) => position,
                Err(e) => {
                    warn!(show = %show.title, season, episode = number, error = %e,
                          "episode index outside the position encoding, skipping");
                    continue;
                }
            };
            episodes.push(EpisodeState {
                rating_key: Some(item.rating_key),
                position,
                is_available: true,
                view_count: item.view_count,
                last_viewed_at: item.last_viewed_at,
            });
        }

        Ok(ShowSnapshot {
            show_rating_key: show.rating_key.clone(),
            show_title: show.title.clone(),
            tmdb_id,
            tvdb_id: show.external_ids.tvdb,
            manually_protected,
            grace,
            viewers,
            episodes,
        })
    }
}

/// Watchlist entries and requests for this show, enriched with the
/// requester's viewing progress.
fn grace_entries(
    tmdb_id: Option<i64>,
    ctx: &RunContext,
    viewers: &[ViewerState],
) -> Vec<GraceEntry> {
    let Some(tmdb) = tmdb_id else {
        return Vec::new();
    };
    let progress = |user_id: &str| {
        viewers
            .iter()
            .find(|v| v.user_id == user_id)
            .map(|v| (true, v.current_position))
            .unwrap_or((false, Position::from_encoded(0)))
    };

    let mut entries = Vec::new();
    for entry in &ctx.watchlist {
        if entry.tmdb_id == tmdb && entry.media_type == MediaType::Show {
            let (has_velocity_row, current_position) = progress(&entry.user_id);
            entries.push(GraceEntry {
                user_id: entry.user_id.clone(),
                added_at: entry.added_at,
                has_velocity_row,
                current_position,
            });
        }
    }
    for request in &ctx.requests {
        if request.tmdb_id == tmdb && request.media_type == MediaType::Show {
            let (has_velocity_row, current_position) = progress(&request.user_id);
            entries.push(GraceEntry {
                user_id: request.user_id.clone(),
                added_at: request.requested_at,
                has_velocity_row,
                current_position,
            });
        }
    }
    entries
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzerRunSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub shows_analyzed: usize,
    pub episodes_analyzed: usize,
    pub episodes_safe: usize,
    pub episodes_deleted: usize,
    pub redownloads_queued: usize,
    pub errors: usize,
}

pub struct AnalyzerService {
    loader: SnapshotLoader,
    stats: EpisodeStatsRepository,
    settings: SettingsRepository,
    media_server: Arc<dyn MediaServer>,
    tv: Option<Arc<dyn TvDownloader>>,
    queue: Arc<RedownloadQueue>,
    clock: Clock,
    pacing: Duration,
}

impl AnalyzerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        loader: SnapshotLoader,
        stats: EpisodeStatsRepository,
        settings: SettingsRepository,
        media_server: Arc<dyn MediaServer>,
        tv: Option<Arc<dyn TvDownloader>>,
        queue: Arc<RedownloadQueue>,
        clock: Clock,
        pacing: Duration,
    ) -> Self {
        Self {
            loader,
            stats,
            settings,
            media_server,
            tv,
            queue,
            clock,
            pacing,
        }
    }

    /// One full analyzer pass over every show in the library.
    pub async fn run(&self, dry_run: bool) -> Result<AnalyzerRunSummary> {
        let now = self.clock.now();
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        let mut summary = AnalyzerRunSummary {
            timestamp: Some(now),
            dry_run,
            ..AnalyzerRunSummary::default()
        };

        if !settings.enabled {
            info!("lifecycle analysis disabled, skipping run");
            return Ok(summary);
        }

        let ctx = self.loader.load_run_context().await?;
        let shows = self.loader.library.list_by_type(MediaType::Show).await?;
        let series_index = self.load_series_index().await;

        for show in &shows {
            let snapshot = self.loader.load_show_snapshot(show, &ctx).await?;
            if snapshot.episodes.is_empty() {
                continue;
            }
            summary.shows_analyzed += 1;

            let mut safe_episodes = Vec::new();
            for episode in &snapshot.episodes {
                let verdict = decide_episode(&snapshot, episode, now, &settings);
                summary.episodes_analyzed += 1;
                if verdict.safe_to_delete {
                    summary.episodes_safe += 1;
                }

                self.stats
                    .upsert(&EpisodeStats {
                        show_rating_key: snapshot.show_rating_key.clone(),
                        show_title: snapshot.show_title.clone(),
                        season_number: episode.position.season(),
                        episode_number: episode.position.episode(),
                        velocity_position: episode.position,
                        is_available: episode.is_available,
                        safe_to_delete: verdict.safe_to_delete,
                        deletion_reason: Some(verdict.reason.clone()),
                        users_beyond: verdict.users_beyond.clone(),
                        users_approaching: verdict.users_approaching.clone(),
                        last_analyzed_at: now,
                        deleted_at: None,
                        deleted_by_cleanup: false,
                    })
                    .await?;

                if verdict.safe_to_delete && episode.is_available {
                    safe_episodes.push(episode.clone());
                }
            }

            if !dry_run && !safe_episodes.is_empty() {
                match self
                    .delete_episodes(&snapshot, &safe_episodes, series_index.as_ref(), now)
                    .await
                {
                    Ok(deleted) => summary.episodes_deleted += deleted,
                    Err(e) => {
                        warn!(show = %snapshot.show_title, error = %e, "episode deletion failed");
                        summary.errors += 1;
                    }
                }
            }

            // Episodes removed earlier may be needed back soon
            if settings.redownload_enabled && settings.proactive_redownload {
                summary.redownloads_queued += self
                    .queue_missing_episodes(&snapshot, now, &settings)
                    .await?;
            }
        }

        info!(
            shows = summary.shows_analyzed,
            episodes = summary.episodes_analyzed,
            safe = summary.episodes_safe,
            deleted = summary.episodes_deleted,
            queued = summary.redownloads_queued,
            dry_run,
            "analyzer pass complete"
        );
        Ok(summary)
    }

    async fn load_series_index(&self) -> Option<SeriesIndex> {
        let tv = self.tv.as_ref()?;
        match tv.list_series().await {
            Ok(series) => Some(SeriesIndex::build(series)),
            Err(e) => {
                warn!(error = %e, "series listing failed, deleting through the media server");
                None
            }
        }
    }

    /// Remove episode files, preferring the downloader (which also stops
    /// re-monitoring) and falling back to a media-server delete.
    async fn delete_episodes(
        &self,
        snapshot: &ShowSnapshot,
        episodes: &[EpisodeState],
        series_index: Option<&SeriesIndex>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut deleted = 0;

        let downloader_series = series_index
            .and_then(|index| index.find(snapshot.tvdb_id, snapshot.tmdb_id, &snapshot.show_title));

        let downloader_episodes = match (self.tv.as_ref(), downloader_series) {
            (Some(tv), Some(series_id)) => match tv.list_episodes(series_id).await {
                Ok(episodes) => Some(episodes),
                Err(e) => {
                    warn!(show = %snapshot.show_title, error = %e, "episode listing failed");
                    None
                }
            },
            _ => None,
        };

        for episode in episodes {
            tokio::time::sleep(self.pacing).await;

            let via_downloader = match (self.tv.as_ref(), downloader_episodes.as_ref()) {
                (Some(tv), Some(remote_episodes)) => {
                    let remote = remote_episodes.iter().find(|e| {
                        e.season_number == episode.position.season()
                            && e.episode_number == episode.position.episode()
                    });
                    match remote {
                        Some(remote) => {
                            if let Err(e) = tv.monitor_episodes(&[remote.id], false).await {
                                warn!(error = %e, "unmonitor failed");
                            }
                            match remote.episode_file_id {
                                Some(file_id) => tv.delete_episode_file(file_id).await.is_ok(),
                                None => false,
                            }
                        }
                        None => false,
                    }
                }
                _ => false,
            };

            if !via_downloader {
                if let Some(rating_key) = &episode.rating_key {
                    if let Err(e) = self.media_server.delete_item(rating_key).await {
                        warn!(rating_key = %rating_key, error = %e, "media server delete failed");
                        continue;
                    }
                } else {
                    continue;
                }
            }

            self.stats
                .mark_deleted(
                    &snapshot.show_rating_key,
                    episode.position.season(),
                    episode.position.episode(),
                    now,
                )
                .await?;
            deleted += 1;
            debug!(show = %snapshot.show_title, episode = %episode.position, "episode removed");
        }

        Ok(deleted)
    }

    /// Queue redownloads for previously deleted episodes an approaching
    /// viewer will need within the lead window.
    async fn queue_missing_episodes(
        &self,
        snapshot: &ShowSnapshot,
        now: DateTime<Utc>,
        settings: &LifecycleSettings,
    ) -> Result<usize> {
        let mut queued = 0;
        for row in self.stats.list_for_show(&snapshot.show_rating_key).await? {
            if row.is_available {
                continue;
            }
            let absent = EpisodeState {
                rating_key: None,
                position: row.velocity_position,
                is_available: false,
                view_count: 0,
                last_viewed_at: None,
            };
            if let Some(need) =
                redownload_need(snapshot, &absent, now, settings, settings.redownload_lead_days)
            {
                if self.queue.push(EpisodeFetchRequest {
                    show_rating_key: snapshot.show_rating_key.clone(),
                    show_title: snapshot.show_title.clone(),
                    tvdb_id: snapshot.tvdb_id,
                    tmdb_id: snapshot.tmdb_id,
                    season_number: need.position.season(),
                    episode_number: need.position.episode(),
                    needed_by: need.needed_by,
                    emergency: false,
                }) {
                    queued += 1;
                }
            }
        }
        Ok(queued)
    }
}
