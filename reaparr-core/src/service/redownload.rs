//! Redownload passes
//!
//! The proactive pass finds absent episodes an approaching viewer will
//! need within the lead window and queues them; the emergency pass does
//! the same with an hours-scale window and queue priority. The queue
//! processor turns queued intents into downloader monitor + search calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{LifecycleSettings, MediaType};
use crate::provider::{RemoteSeries, TvDownloader};
use crate::repository::SettingsRepository;
use crate::service::analyzer::SnapshotLoader;
use crate::service::decision::{redownload_need, EpisodeState};
use crate::service::matching::normalize_title;
use crate::service::queue::{EpisodeFetchRequest, RedownloadQueue};
use crate::Result;

/// Lookup of downloader series by external id or normalized title
pub struct SeriesIndex {
    by_tvdb: HashMap<i64, i64>,
    by_tmdb: HashMap<i64, i64>,
    by_title: HashMap<String, i64>,
}

impl SeriesIndex {
    #[must_use]
    pub fn build(series: Vec<RemoteSeries>) -> Self {
        let mut by_tvdb = HashMap::new();
        let mut by_tmdb = HashMap::new();
        let mut by_title = HashMap::new();
        for s in series {
            if let Some(tvdb) = s.tvdb_id {
                by_tvdb.insert(tvdb, s.id);
            }
            if let Some(tmdb) = s.tmdb_id {
                by_tmdb.insert(tmdb, s.id);
            }
            by_title.insert(normalize_title(&s.title), s.id);
        }
        Self {
            by_tvdb,
            by_tmdb,
            by_title,
        }
    }

    #[must_use]
    pub fn find(&self, tvdb_id: Option<i64>, tmdb_id: Option<i64>, title: &str) -> Option<i64> {
        if let Some(id) = tvdb_id.and_then(|tvdb| self.by_tvdb.get(&tvdb)) {
            return Some(*id);
        }
        if let Some(id) = tmdb_id.and_then(|tmdb| self.by_tmdb.get(&tmdb)) {
            return Some(*id);
        }
        self.by_title.get(&normalize_title(title)).copied()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RedownloadRunSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub emergency: bool,
    pub shows_scanned: usize,
    pub episodes_queued: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueProcessSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub drained: usize,
    pub searched: usize,
    pub unresolved: usize,
    pub errors: usize,
}

pub struct RedownloadService {
    loader: SnapshotLoader,
    stats: crate::repository::EpisodeStatsRepository,
    settings: SettingsRepository,
    tv: Option<Arc<dyn TvDownloader>>,
    queue: Arc<RedownloadQueue>,
    clock: Clock,
    pacing: Duration,
}

impl RedownloadService {
    pub fn new(
        loader: SnapshotLoader,
        stats: crate::repository::EpisodeStatsRepository,
        settings: SettingsRepository,
        tv: Option<Arc<dyn TvDownloader>>,
        queue: Arc<RedownloadQueue>,
        clock: Clock,
        pacing: Duration,
    ) -> Self {
        Self {
            loader,
            stats,
            settings,
            tv,
            queue,
            clock,
            pacing,
        }
    }

    /// Emergency scan: hours-scale window, queue priority.
    pub async fn run_emergency(&self) -> Result<RedownloadRunSummary> {
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        self.scan(settings.emergency_buffer_hours / 24.0, true, &settings)
            .await
    }

    /// Proactive scan: days-scale lead window.
    pub async fn run_proactive(&self) -> Result<RedownloadRunSummary> {
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        if !settings.proactive_redownload {
            debug!("proactive redownload disabled");
            return Ok(RedownloadRunSummary {
                timestamp: Some(self.clock.now()),
                ..RedownloadRunSummary::default()
            });
        }
        self.scan(settings.redownload_lead_days, false, &settings)
            .await
    }

    async fn scan(
        &self,
        lead_days: f64,
        emergency: bool,
        settings: &LifecycleSettings,
    ) -> Result<RedownloadRunSummary> {
        let now = self.clock.now();
        let mut summary = RedownloadRunSummary {
            timestamp: Some(now),
            emergency,
            ..RedownloadRunSummary::default()
        };

        if !settings.redownload_enabled {
            debug!("redownload disabled, skipping scan");
            return Ok(summary);
        }

        let ctx = self.loader.load_run_context().await?;
        for show in self.loader.library.list_by_type(MediaType::Show).await? {
            let snapshot = self.loader.load_show_snapshot(&show, &ctx).await?;
            if snapshot.viewers.is_empty() {
                continue;
            }
            summary.shows_scanned += 1;

            // Absent episodes are the ones the audit trail knows were
            // removed but the library no longer holds.
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
                if let Some(need) = redownload_need(&snapshot, &absent, now, settings, lead_days) {
                    if self.queue.push(EpisodeFetchRequest {
                        show_rating_key: snapshot.show_rating_key.clone(),
                        show_title: snapshot.show_title.clone(),
                        tvdb_id: snapshot.tvdb_id,
                        tmdb_id: snapshot.tmdb_id,
                        season_number: need.position.season(),
                        episode_number: need.position.episode(),
                        needed_by: need.needed_by,
                        emergency,
                    }) {
                        summary.episodes_queued += 1;
                    }
                }
            }
        }

        info!(
            emergency,
            shows = summary.shows_scanned,
            queued = summary.episodes_queued,
            "redownload scan complete"
        );
        Ok(summary)
    }

    /// Drain the queue and turn entries into monitor + search calls.
    pub async fn process_queue(&self) -> Result<QueueProcessSummary> {
        let now = self.clock.now();
        let mut summary = QueueProcessSummary {
            timestamp: Some(now),
            ..QueueProcessSummary::default()
        };

        let entries = self.queue.drain();
        summary.drained = entries.len();
        if entries.is_empty() {
            return Ok(summary);
        }

        let Some(tv) = self.tv.as_ref() else {
            warn!(
                entries = entries.len(),
                "no TV downloader configured, dropping queued redownloads"
            );
            summary.unresolved = entries.len();
            return Ok(summary);
        };

        let index = SeriesIndex::build(tv.list_series().await?);

        // Group queued episodes per downloader series to batch the calls
        let mut per_series: HashMap<i64, Vec<EpisodeFetchRequest>> = HashMap::new();
        for entry in entries {
            match index.find(entry.tvdb_id, entry.tmdb_id, &entry.show_title) {
                Some(series_id) => per_series.entry(series_id).or_default().push(entry),
                None => {
                    warn!(show = %entry.show_title, "show not found in downloader, cannot redownload");
                    summary.unresolved += 1;
                }
            }
        }

        for (series_id, wanted) in per_series {
            tokio::time::sleep(self.pacing).await;
            let episodes = match tv.list_episodes(series_id).await {
                Ok(episodes) => episodes,
                Err(e) => {
                    warn!(series_id, error = %e, "episode listing failed");
                    summary.errors += 1;
                    continue;
                }
            };

            let episode_ids: Vec<i64> = wanted
                .iter()
                .filter_map(|w| {
                    episodes
                        .iter()
                        .find(|e| {
                            e.season_number == w.season_number
                                && e.episode_number == w.episode_number
                        })
                        .map(|e| e.id)
                })
                .collect();
            if episode_ids.is_empty() {
                summary.unresolved += wanted.len();
                continue;
            }

            if let Err(e) = tv.monitor_episodes(&episode_ids, true).await {
                warn!(series_id, error = %e, "monitor failed");
                summary.errors += 1;
                continue;
            }
            if let Err(e) = tv.search_episodes(&episode_ids).await {
                warn!(series_id, error = %e, "search command failed");
                summary.errors += 1;
                continue;
            }
            summary.searched += episode_ids.len();
        }

        info!(
            drained = summary.drained,
            searched = summary.searched,
            unresolved = summary.unresolved,
            "redownload queue processed"
        );
        Ok(summary)
    }

    /// Promote queued entries for shows on any active watchlist so a
    /// watchlist add takes effect before the next full pass.
    pub async fn prioritize_watchlisted(&self) -> Result<usize> {
        if self.queue.is_empty() {
            return Ok(0);
        }
        let watchlisted: Vec<i64> = self
            .loader
            .watchlist
            .list_active()
            .await?
            .into_iter()
            .map(|entry| entry.tmdb_id)
            .collect();
        if watchlisted.is_empty() {
            return Ok(0);
        }
        let promoted = self
            .queue
            .promote_where(|entry| entry.tmdb_id.is_some_and(|id| watchlisted.contains(&id)));
        if promoted > 0 {
            info!(promoted, "watchlisted shows promoted in redownload queue");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(id: i64, title: &str, tvdb: Option<i64>, tmdb: Option<i64>) -> RemoteSeries {
        RemoteSeries {
            id,
            title: title.to_string(),
            tvdb_id: tvdb,
            tmdb_id: tmdb,
            imdb_id: None,
        }
    }

    #[test]
    fn external_ids_win_over_titles() {
        let index = SeriesIndex::build(vec![
            series(1, "The Expanse", Some(280_619), Some(63_639)),
            series(2, "The Expanse (2015)", None, None),
        ]);
        assert_eq!(index.find(Some(280_619), None, "whatever"), Some(1));
        assert_eq!(index.find(None, Some(63_639), "whatever"), Some(1));
    }

    #[test]
    fn title_fallback_is_normalized() {
        let index = SeriesIndex::build(vec![series(7, "Mr. Robot", None, None)]);
        assert_eq!(index.find(None, None, "Mr R0b0t"), Some(7));
        assert_eq!(index.find(None, None, "Unknown Show"), None);
    }
}
