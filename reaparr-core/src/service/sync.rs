//! Delta synchronizer
//!
//! Cursor-driven pull of library membership and watch history from the
//! media server. One tick runs the library, watch-history, and user
//! sub-passes in order, then a periodic lifecycle-repair sub-pass. Ticks
//! never overlap (own running flag, independent of the analyzer lock), and
//! repeated failures put the loop into a short back-off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{
    LibraryItem, LifecycleRecord, LifecycleStatus, MediaType, Position, WatchEvent,
};
use crate::models::resolve_show_key;
use crate::provider::{HistoryEvent, MediaServer};
use crate::repository::velocity::VelocityObservation;
use crate::repository::{
    LibraryItemRepository, LifecycleRepository, MediaRequestRepository, MediaUserRepository,
    SettingsRepository, UserVelocityRepository, WatchEventRepository, WatchlistRepository,
};
use crate::service::matching::{resolve_tmdb_id, TitleCandidate};
use crate::transaction::UnitOfWork;
use crate::Result;

const CURSOR_LIBRARY: &str = "sync.last_library_sync";
const CURSOR_WATCH_HISTORY: &str = "sync.last_watch_history_sync";
const CURSOR_USERS: &str = "sync.last_user_sync";
const CURSOR_LIFECYCLE_REPAIR: &str = "sync.last_lifecycle_repair";
const CURSOR_REMOVAL_CHECK: &str = "sync.last_removal_check";
const CACHE_SNAPSHOT: &str = "sync.library_cache";

/// Retrograde window absorbing clock skew and out-of-order delivery.
/// Events later than this behind wall clock can be missed; accepted bound.
const RETROGRADE_WINDOW_SECS: i64 = 60;
/// Removal detection only runs on full fetches at least this far apart,
/// so transient disappearances do not read as deletions.
const REMOVAL_QUIET_INTERVAL_MINS: i64 = 5;
const LIFECYCLE_REPAIR_INTERVAL_MINS: i64 = 5;
const FIRST_RUN_HISTORY_DAYS: i64 = 7;
const HISTORY_FETCH_LIMIT: u32 = 1000;
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF_SECS: i64 = 30;

fn retrograde_window() -> Duration {
    Duration::seconds(RETROGRADE_WINDOW_SECS)
}

/// Cached projection of one library item, persisted as JSON per tick so a
/// restart loses at most one tick of additions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedItem {
    pub title: String,
    pub media_type: MediaType,
    pub library_id: String,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub tmdb_id: Option<i64>,
}

impl CachedItem {
    fn from_item(item: &LibraryItem) -> Self {
        Self {
            title: item.title.clone(),
            media_type: item.media_type,
            library_id: item.library_id.clone(),
            view_count: item.view_count,
            last_viewed_at: item.last_viewed_at,
            tmdb_id: item.external_ids.tmdb,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub full_fetch: bool,
    pub items_added: usize,
    pub items_updated: usize,
    pub items_removed: usize,
    pub events_fetched: usize,
    pub events_ingested: usize,
    pub velocities_updated: usize,
    pub users_imported: usize,
    pub lifecycle_repaired: usize,
}

/// What one tick did
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Skipped(&'static str),
    Completed(SyncSummary),
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DeltaSynchronizer {
    pool: PgPool,
    library: LibraryItemRepository,
    users: MediaUserRepository,
    watch_events: WatchEventRepository,
    velocities: UserVelocityRepository,
    lifecycle: LifecycleRepository,
    requests: MediaRequestRepository,
    watchlist: WatchlistRepository,
    settings: SettingsRepository,
    media_server: Arc<dyn MediaServer>,
    clock: Clock,
    pacing: StdDuration,
    running: AtomicBool,
    consecutive_errors: AtomicU32,
    backoff_until: Mutex<Option<DateTime<Utc>>>,
    last_summary: RwLock<Option<SyncSummary>>,
}

impl DeltaSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        library: LibraryItemRepository,
        users: MediaUserRepository,
        watch_events: WatchEventRepository,
        velocities: UserVelocityRepository,
        lifecycle: LifecycleRepository,
        requests: MediaRequestRepository,
        watchlist: WatchlistRepository,
        settings: SettingsRepository,
        media_server: Arc<dyn MediaServer>,
        clock: Clock,
        pacing: StdDuration,
    ) -> Self {
        Self {
            pool,
            library,
            users,
            watch_events,
            velocities,
            lifecycle,
            requests,
            watchlist,
            settings,
            media_server,
            clock,
            pacing,
            running: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
            backoff_until: Mutex::new(None),
            last_summary: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_summary(&self) -> Option<SyncSummary> {
        self.last_summary.read().clone()
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// One synchronizer tick. Never overlaps with itself; repeated errors
    /// back the loop off for a short interval.
    pub async fn tick(&self) -> Result<SyncOutcome> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("sync tick already running, skipping");
            return Ok(SyncOutcome::Skipped("already running"));
        }
        let _guard = RunningGuard(&self.running);

        let now = self.clock.now();
        if let Some(until) = *self.backoff_until.lock() {
            if now < until {
                debug!(until = %until, "sync backing off after repeated errors");
                return Ok(SyncOutcome::Skipped("backing off"));
            }
        }

        match self.run_once(now).await {
            Ok(summary) => {
                self.consecutive_errors.store(0, Ordering::SeqCst);
                *self.backoff_until.lock() = None;
                *self.last_summary.write() = Some(summary.clone());
                Ok(SyncOutcome::Completed(summary))
            }
            Err(e) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    *self.backoff_until.lock() = Some(now + Duration::seconds(ERROR_BACKOFF_SECS));
                    warn!(errors, "sync entering back-off after repeated failures");
                }
                Err(e)
            }
        }
    }

    /// Drop every cursor and the cache snapshot, then run a full tick.
    pub async fn force_full_sync(&self) -> Result<SyncOutcome> {
        for key in [
            CURSOR_LIBRARY,
            CURSOR_WATCH_HISTORY,
            CURSOR_USERS,
            CURSOR_LIFECYCLE_REPAIR,
            CURSOR_REMOVAL_CHECK,
            CACHE_SNAPSHOT,
        ] {
            self.settings.delete(key).await?;
        }
        info!("sync cursors cleared, running full sync");
        self.tick().await
    }

    async fn run_once(&self, now: DateTime<Utc>) -> Result<SyncSummary> {
        let mut summary = SyncSummary {
            timestamp: Some(now),
            ..SyncSummary::default()
        };

        self.library_pass(now, &mut summary).await?;
        self.watch_history_pass(now, &mut summary).await?;
        self.user_import_pass(now, &mut summary).await?;
        self.lifecycle_repair_if_due(now, &mut summary).await?;

        info!(
            added = summary.items_added,
            updated = summary.items_updated,
            removed = summary.items_removed,
            events = summary.events_ingested,
            velocities = summary.velocities_updated,
            "sync tick complete"
        );
        Ok(summary)
    }

    // ---- library sub-pass ----

    async fn library_pass(&self, now: DateTime<Utc>, summary: &mut SyncSummary) -> Result<()> {
        let cursor = self.read_cursor(CURSOR_LIBRARY).await?;
        let last_removal = self.read_cursor(CURSOR_REMOVAL_CHECK).await?;
        let removal_due = last_removal.is_none_or(|t| now - t >= Duration::minutes(REMOVAL_QUIET_INTERVAL_MINS));
        let full_fetch = cursor.is_none() || removal_due;
        summary.full_fetch = full_fetch;

        let libraries = self.media_server.list_libraries().await?;
        let mut current: HashMap<String, LibraryItem> = HashMap::new();
        for library in &libraries {
            let items = if full_fetch {
                self.media_server.list_library_contents(&library.id).await?
            } else {
                // The retrograde window re-reads the last minute so nothing
                // lands between the fetch and the cursor write.
                self.media_server
                    .list_recently_added(&library.id, cursor.unwrap_or(now) - retrograde_window())
                    .await?
            };
            for item in items {
                current.insert(item.rating_key.clone(), item);
            }
            tokio::time::sleep(self.pacing).await;
        }

        let cache = self.load_cache().await?;

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (key, item) in &current {
            match cache.get(key) {
                None => added.push(item.clone()),
                Some(cached)
                    if cached.view_count != item.view_count
                        || cached.last_viewed_at != item.last_viewed_at =>
                {
                    updated.push(item.clone());
                }
                Some(_) => {}
            }
        }
        let removed: Vec<(String, CachedItem)> = if full_fetch {
            cache
                .iter()
                .filter(|(key, _)| !current.contains_key(*key))
                .map(|(key, item)| (key.clone(), item.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let candidates = self.title_candidates().await?;

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut new_cache = cache;

        for item in added.iter().chain(updated.iter()) {
            self.library.upsert_tx(uow.transaction()?, item).await?;
            new_cache.insert(item.rating_key.clone(), CachedItem::from_item(item));
        }

        for item in &added {
            if !matches!(item.media_type, MediaType::Movie | MediaType::Show) {
                continue;
            }
            match resolve_tmdb_id(item, &candidates) {
                Some(tmdb) => {
                    self.lifecycle
                        .upsert_tx(
                            uow.transaction()?,
                            &LifecycleRecord {
                                tmdb_id: tmdb,
                                media_type: item.media_type,
                                rating_key: Some(item.rating_key.clone()),
                                title: item.title.clone(),
                                status: LifecycleStatus::Available,
                                updated_at: now,
                                deleted_at: None,
                            },
                        )
                        .await?;
                    let satisfied = self
                        .requests
                        .mark_available_tx(uow.transaction()?, tmdb, item.media_type, now)
                        .await?;
                    if satisfied > 0 {
                        info!(title = %item.title, tmdb, satisfied, "request now available");
                    }
                    if let Some(cached) = new_cache.get_mut(&item.rating_key) {
                        cached.tmdb_id = Some(tmdb);
                    }
                }
                None => {
                    debug!(title = %item.title, "no TMDB id resolvable for new item");
                }
            }
        }

        for (rating_key, cached) in &removed {
            self.library.delete_tx(uow.transaction()?, rating_key).await?;
            if let Some(tmdb) = cached.tmdb_id {
                self.lifecycle
                    .mark_deleted_tx(uow.transaction()?, tmdb, cached.media_type, now)
                    .await?;
            }
            new_cache.remove(rating_key);
        }

        self.settings
            .set_tx(
                uow.transaction()?,
                CACHE_SNAPSHOT,
                &serde_json::to_string(&new_cache)?,
            )
            .await?;
        self.settings
            .set_tx(uow.transaction()?, CURSOR_LIBRARY, &now.to_rfc3339())
            .await?;
        if full_fetch {
            self.settings
                .set_tx(uow.transaction()?, CURSOR_REMOVAL_CHECK, &now.to_rfc3339())
                .await?;
        }
        uow.commit().await?;

        summary.items_added = added.len();
        summary.items_updated = updated.len();
        summary.items_removed = removed.len();
        Ok(())
    }

    // ---- watch-history sub-pass ----

    async fn watch_history_pass(&self, now: DateTime<Utc>, summary: &mut SyncSummary) -> Result<()> {
        let cursor = self.read_cursor(CURSOR_WATCH_HISTORY).await?;
        let since = cursor.map_or(now - Duration::days(FIRST_RUN_HISTORY_DAYS), |c| c - retrograde_window());

        let events = self
            .media_server
            .list_watch_history(since, HISTORY_FETCH_LIMIT)
            .await?;
        summary.events_fetched = events.len();

        let mut uow = UnitOfWork::begin(&self.pool).await?;

        // Group episode events per (user, show) to derive velocity
        let mut groups: HashMap<(String, String), Vec<(&HistoryEvent, Position, bool)>> =
            HashMap::new();

        for event in &events {
            let Some(media_type) = normalize_event_type(event) else {
                continue;
            };
            let watch_event = WatchEvent {
                user_id: event.account_id.clone(),
                rating_key: event.rating_key.clone(),
                media_type,
                show_title: event.show_title.clone(),
                show_rating_key: event.show_rating_key.clone(),
                season_number: event.season_number,
                episode_number: event.episode_number,
                watched_at: event.viewed_at,
            };
            let inserted = self.watch_events.insert_tx(uow.transaction()?, &watch_event).await?;
            if inserted {
                summary.events_ingested += 1;
            }

            if media_type != MediaType::Episode {
                continue;
            }
            let (Some(season), Some(number)) = (event.season_number, event.episode_number) else {
                continue;
            };
            let position = match Position::new(season, number) {
                Ok(position) => position,
                Err(e) => {
                    warn!(rating_key = %event.rating_key, error = %e,
                          "watch event outside the position encoding, skipping for velocity");
                    continue;
                }
            };
            if event.show_rating_key.is_none() && event.show_title.is_none() {
                debug!(rating_key = %event.rating_key, "episode event without show reference");
                continue;
            }
            let show_key = resolve_show_key(
                event.show_rating_key.as_deref(),
                event.show_title.as_deref().unwrap_or(""),
            );
            groups
                .entry((event.account_id.clone(), show_key))
                .or_default()
                .push((event, position, inserted));
        }

        for ((user_id, show_key), mut group) in groups {
            group.sort_by_key(|(event, _, _)| event.viewed_at);
            let (latest, latest_position, _) = group[group.len() - 1];

            let velocity = batch_velocity(group.len(), group[0].0.viewed_at, latest.viewed_at);
            let new_events = group.iter().filter(|(_, _, inserted)| *inserted).count() as i64;

            self.velocities
                .upsert_tx(
                    uow.transaction()?,
                    &VelocityObservation {
                        user_id,
                        show_key,
                        show_title: latest.show_title.clone().unwrap_or_default(),
                        position: latest_position,
                        velocity,
                        new_events,
                        last_watched_at: latest.viewed_at,
                    },
                )
                .await?;
            summary.velocities_updated += 1;
        }

        self.settings
            .set_tx(uow.transaction()?, CURSOR_WATCH_HISTORY, &now.to_rfc3339())
            .await?;
        uow.commit().await
    }

    // ---- user import sub-pass ----

    async fn user_import_pass(&self, now: DateTime<Utc>, summary: &mut SyncSummary) -> Result<()> {
        let users = self.media_server.list_users().await?;
        for user in &users {
            self.users.upsert(&user.account_id, &user.name).await?;
        }
        summary.users_imported = users.len();
        self.settings.set(CURSOR_USERS, &now.to_rfc3339()).await
    }

    // ---- lifecycle repair sub-pass ----

    async fn lifecycle_repair_if_due(
        &self,
        now: DateTime<Utc>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let last = self.read_cursor(CURSOR_LIFECYCLE_REPAIR).await?;
        if last.is_some_and(|t| now - t < Duration::minutes(LIFECYCLE_REPAIR_INTERVAL_MINS)) {
            return Ok(());
        }

        let candidates = self.title_candidates().await?;
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        for item in self.library.list_all().await? {
            if !matches!(item.media_type, MediaType::Movie | MediaType::Show) {
                continue;
            }
            let existing = match item.external_ids.tmdb {
                Some(tmdb) => self.lifecycle.get(tmdb, item.media_type).await?,
                None => self.lifecycle.find_by_rating_key(&item.rating_key).await?,
            };
            if existing.is_some() {
                continue;
            }
            let Some(tmdb) = resolve_tmdb_id(&item, &candidates) else {
                continue;
            };
            self.lifecycle
                .upsert_tx(
                    uow.transaction()?,
                    &LifecycleRecord {
                        tmdb_id: tmdb,
                        media_type: item.media_type,
                        rating_key: Some(item.rating_key.clone()),
                        title: item.title.clone(),
                        status: LifecycleStatus::Available,
                        updated_at: now,
                        deleted_at: None,
                    },
                )
                .await?;
            summary.lifecycle_repaired += 1;
        }

        self.settings
            .set_tx(uow.transaction()?, CURSOR_LIFECYCLE_REPAIR, &now.to_rfc3339())
            .await?;
        uow.commit().await
    }

    // ---- helpers ----

    async fn title_candidates(&self) -> Result<Vec<TitleCandidate>> {
        let requests = self.requests.list_all().await?;
        let watchlist = self.watchlist.list_active().await?;
        Ok(TitleCandidate::from_requests_and_watchlist(
            &requests, &watchlist,
        ))
    }

    async fn read_cursor(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.settings.get(key).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Ok(Some(parsed.with_timezone(&Utc))),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "unreadable cursor, treating as unset");
                Ok(None)
            }
        }
    }

    async fn load_cache(&self) -> Result<HashMap<String, CachedItem>> {
        let Some(raw) = self.settings.get(CACHE_SNAPSHOT).await? else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(error = %e, "unreadable library cache snapshot, rebuilding from scratch");
                Ok(HashMap::new())
            }
        }
    }
}

/// History entries occasionally carry container types the engine does not
/// track; those are dropped here.
fn normalize_event_type(event: &HistoryEvent) -> Option<MediaType> {
    match event.media_type {
        MediaType::Movie | MediaType::Episode => Some(event.media_type),
        MediaType::Show | MediaType::Season => None,
    }
}

/// Velocity for one batch of a viewer's episode events: count over span,
/// in episodes per day. `None` keeps the stored velocity (a single event
/// or a zero span says nothing about rate).
fn batch_velocity(count: usize, first: DateTime<Utc>, last: DateTime<Utc>) -> Option<f64> {
    if count < 2 {
        return None;
    }
    let span_days = (last - first).num_seconds() as f64 / 86_400.0;
    (span_days > 0.0).then(|| count as f64 / span_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("timestamp")
    }

    #[test]
    fn single_event_keeps_stored_velocity() {
        assert!(batch_velocity(1, ts(1000), ts(1000)).is_none());
    }

    #[test]
    fn zero_span_keeps_stored_velocity() {
        assert!(batch_velocity(3, ts(1000), ts(1000)).is_none());
    }

    #[test]
    fn velocity_is_count_over_span_days() {
        // 4 episodes over 2 days
        let v = batch_velocity(4, ts(0), ts(2 * 86_400)).expect("velocity");
        assert!((v - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cache_snapshot_round_trips() {
        let mut cache = HashMap::new();
        cache.insert(
            "123".to_string(),
            CachedItem {
                title: "Severance".to_string(),
                media_type: MediaType::Show,
                library_id: "2".to_string(),
                view_count: 7,
                last_viewed_at: Some(ts(1_700_000_000)),
                tmdb_id: Some(95_396),
            },
        );
        let encoded = serde_json::to_string(&cache).expect("encode");
        let decoded: HashMap<String, CachedItem> = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded["123"].view_count, 7);
        assert_eq!(decoded["123"].tmdb_id, Some(95_396));
    }
}
