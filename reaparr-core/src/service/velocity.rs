//! Velocity monitoring and velocity cleanup
//!
//! The monitor compares each viewer's current rate to the mean of their
//! recent snapshots; a sharp speed-up queues redownloads so the library
//! stays ahead of the viewer. Cleanup prunes velocity rows for long-idle
//! viewers and enforces the per-pair snapshot bound.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{LifecycleSettings, VelocitySnapshot};
use crate::repository::{SettingsRepository, UserVelocityRepository, VelocitySnapshotRepository};
use crate::service::analyzer::SnapshotLoader;
use crate::service::decision::{redownload_need, EpisodeState};
use crate::service::queue::{EpisodeFetchRequest, RedownloadQueue};
use crate::Result;

/// Snapshots kept per `(user, show)` pair
pub const SNAPSHOT_RETENTION: i64 = 50;
/// Snapshots averaged when judging a velocity change
const CHANGE_WINDOW: i64 = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct VelocityMonitorSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub pairs_checked: usize,
    pub changes_detected: usize,
    pub redownloads_queued: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VelocityCleanupSummary {
    pub timestamp: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub stale_rows: u64,
    pub rows_deleted: u64,
    pub snapshots_pruned: u64,
}

pub struct VelocityService {
    loader: SnapshotLoader,
    stats: crate::repository::EpisodeStatsRepository,
    velocities: UserVelocityRepository,
    snapshots: VelocitySnapshotRepository,
    settings: SettingsRepository,
    queue: Arc<RedownloadQueue>,
    clock: Clock,
    last_cleanup: RwLock<Option<VelocityCleanupSummary>>,
}

impl VelocityService {
    pub fn new(
        loader: SnapshotLoader,
        stats: crate::repository::EpisodeStatsRepository,
        velocities: UserVelocityRepository,
        snapshots: VelocitySnapshotRepository,
        settings: SettingsRepository,
        queue: Arc<RedownloadQueue>,
        clock: Clock,
    ) -> Self {
        Self {
            loader,
            stats,
            velocities,
            snapshots,
            settings,
            queue,
            clock,
            last_cleanup: RwLock::new(None),
        }
    }

    /// One monitor pass over every `(user, show)` velocity row.
    pub async fn monitor(&self) -> Result<VelocityMonitorSummary> {
        let now = self.clock.now();
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        let mut summary = VelocityMonitorSummary {
            timestamp: Some(now),
            ..VelocityMonitorSummary::default()
        };

        if !settings.velocity_monitoring_enabled {
            debug!("velocity monitoring disabled");
            return Ok(summary);
        }

        for row in self.velocities.list_all().await? {
            summary.pairs_checked += 1;

            let recent = self
                .snapshots
                .last_n(&row.user_id, &row.show_key, CHANGE_WINDOW)
                .await?;
            if !recent.is_empty() {
                let mean: f64 =
                    recent.iter().map(|s| s.velocity).sum::<f64>() / recent.len() as f64;
                if mean > 0.0 {
                    let delta = (row.episodes_per_day - mean).abs() / mean;
                    if delta >= settings.velocity_change_threshold {
                        let increased = row.episodes_per_day > mean;
                        summary.changes_detected += 1;
                        if settings.velocity_change_action.triggers_alert() {
                            warn!(
                                user = %row.user_id,
                                show = %row.show_title,
                                previous = mean,
                                current = row.episodes_per_day,
                                increased,
                                "viewing velocity changed sharply"
                            );
                        }
                        if increased && settings.velocity_change_action.triggers_redownload() {
                            summary.redownloads_queued += self
                                .queue_for_show(&row.show_key, now, &settings)
                                .await
                                .unwrap_or_else(|e| {
                                    warn!(show = %row.show_title, error = %e,
                                          "failed to queue redownloads after velocity change");
                                    0
                                });
                        }
                    }
                }
            }

            self.snapshots
                .append(&VelocitySnapshot {
                    user_id: row.user_id.clone(),
                    show_key: row.show_key.clone(),
                    velocity: row.episodes_per_day,
                    position: row.current_position,
                    recorded_at: now,
                })
                .await?;
            self.snapshots
                .prune_keep_latest(&row.user_id, &row.show_key, SNAPSHOT_RETENTION)
                .await?;
        }

        info!(
            pairs = summary.pairs_checked,
            changes = summary.changes_detected,
            queued = summary.redownloads_queued,
            "velocity monitor pass complete"
        );
        Ok(summary)
    }

    /// Queue absent episodes of one show whose need window is open.
    async fn queue_for_show(
        &self,
        show_key: &str,
        now: DateTime<Utc>,
        settings: &LifecycleSettings,
    ) -> Result<usize> {
        // The show key is the rating key except for hash-fallback rows,
        // which cannot be mapped back to a library show.
        let Some(show) = self.loader.library.get(show_key).await? else {
            debug!(show_key, "velocity row has no library show, skipping redownload");
            return Ok(0);
        };
        let ctx = self.loader.load_run_context().await?;
        let snapshot = self.loader.load_show_snapshot(&show, &ctx).await?;

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
                redownload_need(&snapshot, &absent, now, settings, settings.redownload_lead_days)
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

    /// Remove velocity rows for viewers idle well past the active window
    /// and prune snapshots beyond the retention bound.
    pub async fn cleanup(&self, dry_run: bool) -> Result<VelocityCleanupSummary> {
        let now = self.clock.now();
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        let cutoff = now - Duration::days(settings.active_viewer_days * 4);

        let stale_rows = self.velocities.count_stale(cutoff).await? as u64;
        let mut summary = VelocityCleanupSummary {
            timestamp: Some(now),
            dry_run,
            stale_rows,
            rows_deleted: 0,
            snapshots_pruned: 0,
        };

        if !dry_run {
            summary.rows_deleted = self.velocities.delete_stale(cutoff).await?;
            summary.snapshots_pruned = self
                .snapshots
                .prune_all_keep_latest(SNAPSHOT_RETENTION)
                .await?;
        }

        info!(
            stale = summary.stale_rows,
            deleted = summary.rows_deleted,
            pruned = summary.snapshots_pruned,
            dry_run,
            "velocity cleanup complete"
        );
        *self.last_cleanup.write() = Some(summary.clone());
        Ok(summary)
    }

    #[must_use]
    pub fn last_cleanup(&self) -> Option<VelocityCleanupSummary> {
        self.last_cleanup.read().clone()
    }
}
