//! Orchestrator
//!
//! Owns the job schedule: cron jobs (analyzer, queue processor, cleanups)
//! in the configured timezone plus interval tasks for the sub-minute and
//! minutes-scale cadences (delta sync, redownload, watchlist priority,
//! velocity monitor). Mutating passes serialize behind one `is_running`
//! flag; the synchronizer keeps its own. Every job catches and records its
//! own errors, so one failing job never takes down another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::LifecycleSettings;
use crate::repository::{EpisodeStatsRepository, SettingsRepository, WatchEventRepository};
use crate::service::analyzer::AnalyzerService;
use crate::service::movies::MovieCleanupService;
use crate::service::queue::RedownloadQueue;
use crate::service::redownload::RedownloadService;
use crate::service::sync::{DeltaSynchronizer, SyncOutcome};
use crate::service::velocity::{VelocityCleanupSummary, VelocityService};
use crate::{Error, Result};

/// Audit retention for episode stats of long-deleted episodes
const STATS_AUDIT_RETENTION_DAYS: i64 = 180;
/// Watch events older than this are pruned by the log cleanup job
const WATCH_EVENT_RETENTION_DAYS: i64 = 730;
/// Upper bound on one locked pass before it is abandoned
const PASS_DEADLINE_SECS: u64 = 3600;

/// Job families that can be refreshed independently after a settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobGroup {
    Analyzer,
    Sync,
    Redownload,
    Velocity,
}

impl JobGroup {
    const ALL: [Self; 4] = [Self::Analyzer, Self::Sync, Self::Redownload, Self::Velocity];
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub detail: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub group: JobGroup,
    pub schedule: String,
    pub last_run: Option<JobOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusFlags {
    pub is_running: bool,
    pub sync_running: bool,
    pub sync_consecutive_errors: u32,
    pub queue_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub jobs: Vec<JobStatus>,
    pub flags: StatusFlags,
}

struct LockGuard<'a>(&'a AtomicBool);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RegisteredJobs {
    cron_ids: HashMap<JobGroup, Vec<Uuid>>,
    interval_handles: HashMap<JobGroup, Vec<JoinHandle<()>>>,
}

pub struct Orchestrator {
    analyzer: Arc<AnalyzerService>,
    movies: Arc<MovieCleanupService>,
    sync: Arc<DeltaSynchronizer>,
    redownload: Arc<RedownloadService>,
    velocity: Arc<VelocityService>,
    queue: Arc<RedownloadQueue>,
    settings: SettingsRepository,
    stats: EpisodeStatsRepository,
    watch_events: WatchEventRepository,
    timezone: Tz,
    clock: Clock,
    is_running: AtomicBool,
    scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
    registered: tokio::sync::Mutex<RegisteredJobs>,
    schedules: RwLock<Vec<(String, JobGroup, String)>>,
    last_runs: RwLock<HashMap<&'static str, JobOutcome>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        analyzer: Arc<AnalyzerService>,
        movies: Arc<MovieCleanupService>,
        sync: Arc<DeltaSynchronizer>,
        redownload: Arc<RedownloadService>,
        velocity: Arc<VelocityService>,
        queue: Arc<RedownloadQueue>,
        settings: SettingsRepository,
        stats: EpisodeStatsRepository,
        watch_events: WatchEventRepository,
        timezone: Tz,
        clock: Clock,
    ) -> Self {
        Self {
            analyzer,
            movies,
            sync,
            redownload,
            velocity,
            queue,
            settings,
            stats,
            watch_events,
            timezone,
            clock,
            is_running: AtomicBool::new(false),
            scheduler: tokio::sync::Mutex::new(None),
            registered: tokio::sync::Mutex::new(RegisteredJobs::default()),
            schedules: RwLock::new(Vec::new()),
            last_runs: RwLock::new(HashMap::new()),
        }
    }

    /// Register and start every job per the current settings.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("scheduler init failed: {e}")))?;
        *self.scheduler.lock().await = Some(sched);

        for group in JobGroup::ALL {
            self.register_group(group).await?;
        }

        if let Some(sched) = self.scheduler.lock().await.as_mut() {
            sched
                .start()
                .await
                .map_err(|e| Error::Internal(format!("scheduler start failed: {e}")))?;
        }
        info!(timezone = %self.timezone, "orchestrator started");
        Ok(())
    }

    /// Re-register one job group with freshly loaded settings.
    pub async fn refresh(self: &Arc<Self>, group: JobGroup) -> Result<()> {
        // Lock order is always scheduler before registered (see add_cron)
        let (cron_ids, interval_handles) = {
            let mut registered = self.registered.lock().await;
            (
                registered.cron_ids.remove(&group),
                registered.interval_handles.remove(&group),
            )
        };
        if let Some(ids) = cron_ids {
            if let Some(sched) = self.scheduler.lock().await.as_mut() {
                for id in ids {
                    if let Err(e) = sched.remove(&id).await {
                        warn!(?group, error = %e, "failed to remove scheduled job");
                    }
                }
            }
        }
        if let Some(handles) = interval_handles {
            for handle in handles {
                handle.abort();
            }
        }
        self.schedules.write().retain(|(_, g, _)| *g != group);

        info!(?group, "job group refreshed");
        self.register_group(group).await
    }

    async fn register_group(self: &Arc<Self>, group: JobGroup) -> Result<()> {
        let settings = LifecycleSettings::from_rows(&self.settings.get_all().await?);
        match group {
            JobGroup::Analyzer => {
                self.add_cron(group, "main_analyzer", &settings.main_analyzer_cron)
                    .await;
                self.add_cron(group, "queue_processor", &settings.queue_processor_cron)
                    .await;
                self.add_cron(group, "log_cleanup", &settings.log_cleanup_cron)
                    .await;
            }
            JobGroup::Sync => {
                let secs = settings.sync_interval_seconds.max(1) as u64;
                self.add_interval(group, "delta_sync", StdDuration::from_secs(secs))
                    .await;
            }
            JobGroup::Redownload => {
                let minutes = settings.redownload_interval_minutes.max(1) as u64;
                self.add_interval(group, "redownload_pass", StdDuration::from_secs(minutes * 60))
                    .await;
                let minutes = settings.watchlist_priority_interval_minutes.max(1) as u64;
                self.add_interval(
                    group,
                    "watchlist_priority",
                    StdDuration::from_secs(minutes * 60),
                )
                .await;
            }
            JobGroup::Velocity => {
                let minutes = settings.velocity_check_interval.max(1) as u64;
                self.add_interval(
                    group,
                    "velocity_monitor",
                    StdDuration::from_secs(minutes * 60),
                )
                .await;
                self.add_cron(group, "velocity_cleanup", &settings.velocity_cleanup_cron)
                    .await;
            }
        }
        Ok(())
    }

    /// Register one cron job. An invalid expression only disables this job;
    /// the rest of the orchestrator keeps running.
    async fn add_cron(self: &Arc<Self>, group: JobGroup, name: &'static str, expr: &str) {
        let schedule = scheduler_cron(expr);
        let this = Arc::clone(self);
        let job = Job::new_async_tz(schedule.as_str(), self.timezone, move |_id, _sched| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.dispatch(name).await;
            })
        });

        match job {
            Ok(job) => {
                let mut scheduler = self.scheduler.lock().await;
                let Some(sched) = scheduler.as_mut() else {
                    error!(job = name, "scheduler not initialized");
                    return;
                };
                match sched.add(job).await {
                    Ok(id) => {
                        self.registered
                            .lock()
                            .await
                            .cron_ids
                            .entry(group)
                            .or_default()
                            .push(id);
                        self.schedules
                            .write()
                            .push((name.to_string(), group, format!("cron {expr}")));
                        info!(job = name, cron = expr, "job scheduled");
                    }
                    Err(e) => error!(job = name, error = %e, "failed to schedule job"),
                }
            }
            Err(e) => {
                error!(job = name, cron = expr, error = %e, "invalid cron expression, job not registered");
            }
        }
    }

    async fn add_interval(self: &Arc<Self>, group: JobGroup, name: &'static str, period: StdDuration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of tokio's interval fires immediately; skip it
            // so a restart does not stampede the remote services.
            interval.tick().await;
            loop {
                interval.tick().await;
                this.dispatch(name).await;
            }
        });
        self.registered
            .lock()
            .await
            .interval_handles
            .entry(group)
            .or_default()
            .push(handle);
        self.schedules.write().push((
            name.to_string(),
            group,
            format!("every {}", humantime::format_duration(period)),
        ));
        info!(job = name, period = %humantime::format_duration(period), "job scheduled");
    }

    /// Run one named job, recording the outcome. Errors stop here.
    async fn dispatch(self: &Arc<Self>, name: &'static str) {
        let result: Result<Value> = match name {
            "main_analyzer" => self.locked_main_pass(false).await,
            "queue_processor" => {
                self.with_lock("queue_processor", async {
                    self.redownload.process_queue().await.map(to_value)
                })
                .await
            }
            "log_cleanup" => self.with_lock("log_cleanup", self.log_cleanup_pass()).await,
            "velocity_cleanup" => {
                self.with_lock("velocity_cleanup", async {
                    self.velocity.cleanup(false).await.map(to_value)
                })
                .await
            }
            "velocity_monitor" => self.velocity.monitor().await.map(to_value),
            "redownload_pass" => self.redownload_pass().await,
            "watchlist_priority" => self
                .redownload
                .prioritize_watchlisted()
                .await
                .map(|promoted| json!({ "promoted": promoted })),
            "delta_sync" => self.sync.tick().await.map(|outcome| match outcome {
                SyncOutcome::Skipped(reason) => json!({ "skipped": reason }),
                SyncOutcome::Completed(summary) => to_value(summary),
            }),
            other => {
                error!(job = other, "unknown job dispatched");
                return;
            }
        };
        self.record(name, &result);
    }

    async fn locked_main_pass(&self, dry_run: bool) -> Result<Value> {
        self.with_lock("main_analyzer", async {
            let analyzer = self.analyzer.run(dry_run).await?;
            let movies = self.movies.run(dry_run).await?;
            Ok(json!({ "analyzer": to_value(analyzer), "movies": to_value(movies) }))
        })
        .await
    }

    async fn redownload_pass(&self) -> Result<Value> {
        let emergency = self.redownload.run_emergency().await?;
        let proactive = self.redownload.run_proactive().await?;
        Ok(json!({ "emergency": to_value(emergency), "proactive": to_value(proactive) }))
    }

    async fn log_cleanup_pass(&self) -> Result<Value> {
        let now = self.clock.now();
        let stats_pruned = self
            .stats
            .prune_deleted_before(now - Duration::days(STATS_AUDIT_RETENTION_DAYS))
            .await?;
        let events_pruned = self
            .watch_events
            .prune_older_than(now - Duration::days(WATCH_EVENT_RETENTION_DAYS))
            .await?;
        Ok(json!({ "stats_pruned": stats_pruned, "events_pruned": events_pruned }))
    }

    /// Serialize a mutating pass behind the shared flag, bounded by the
    /// pass deadline. The guard releases on every exit path; a timed-out
    /// pass keeps its partial database effects and re-converges on the
    /// next idempotent tick.
    async fn with_lock<F>(&self, name: &'static str, pass: F) -> Result<Value>
    where
        F: std::future::Future<Output = Result<Value>>,
    {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(Error::PassRunning(name));
        }
        let _guard = LockGuard(&self.is_running);
        match tokio::time::timeout(StdDuration::from_secs(PASS_DEADLINE_SECS), pass).await {
            Ok(result) => result,
            Err(_) => {
                warn!(pass = name, "pass deadline exceeded, exiting cleanly");
                Err(Error::Internal(format!("pass {name} exceeded its deadline")))
            }
        }
    }

    fn record(&self, name: &'static str, result: &Result<Value>) {
        let outcome = match result {
            Ok(detail) => JobOutcome {
                timestamp: self.clock.now(),
                success: true,
                detail: detail.clone(),
            },
            Err(Error::PassRunning(holder)) => {
                debug!(job = name, holder = %holder, "another pass holds the lock, skipping");
                JobOutcome {
                    timestamp: self.clock.now(),
                    success: true,
                    detail: json!({ "skipped": "lock held" }),
                }
            }
            Err(e) => {
                error!(job = name, error = %e, "job failed");
                JobOutcome {
                    timestamp: self.clock.now(),
                    success: false,
                    detail: json!({ "error": e.to_string() }),
                }
            }
        };
        self.last_runs.write().insert(name, outcome);
    }

    // ---- operations surface ----

    /// Run the main pass immediately. Fails fast when a pass already holds
    /// the lock.
    pub async fn run_now(&self, dry_run: bool) -> Result<Value> {
        let result = self.locked_main_pass(dry_run).await;
        self.record("main_analyzer", &result);
        result
    }

    /// Run the emergency redownload scan immediately.
    pub async fn run_emergency_now(&self) -> Result<Value> {
        self.redownload.run_emergency().await.map(to_value)
    }

    /// Operational escape hatch: clear a stuck lock.
    pub fn reset_lock(&self) {
        if self.is_running.swap(false, Ordering::SeqCst) {
            warn!("analyzer lock was force-reset");
        }
    }

    pub async fn force_full_sync(&self) -> Result<Value> {
        match self.sync.force_full_sync().await? {
            SyncOutcome::Skipped(reason) => Ok(json!({ "skipped": reason })),
            SyncOutcome::Completed(summary) => Ok(to_value(summary)),
        }
    }

    pub async fn run_velocity_cleanup_now(&self, dry_run: bool) -> Result<Value> {
        let result = self
            .with_lock("velocity_cleanup", async {
                self.velocity.cleanup(dry_run).await.map(to_value)
            })
            .await;
        self.record("velocity_cleanup", &result);
        result
    }

    #[must_use]
    pub fn velocity_cleanup_status(&self) -> Option<VelocityCleanupSummary> {
        self.velocity.last_cleanup()
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        let last_runs = self.last_runs.read();
        let jobs = self
            .schedules
            .read()
            .iter()
            .map(|(name, group, schedule)| JobStatus {
                name: name.clone(),
                group: *group,
                schedule: schedule.clone(),
                last_run: last_runs.get(name.as_str()).cloned(),
            })
            .collect();
        StatusReport {
            jobs,
            flags: StatusFlags {
                is_running: self.is_running.load(Ordering::SeqCst),
                sync_running: self.sync.is_running(),
                sync_consecutive_errors: self.sync.consecutive_errors(),
                queue_length: self.queue.len(),
            },
        }
    }

    /// Stop the scheduler and every interval task.
    pub async fn shutdown(&self) {
        if let Some(mut sched) = self.scheduler.lock().await.take() {
            if let Err(e) = sched.shutdown().await {
                warn!(error = %e, "scheduler shutdown reported an error");
            }
        }
        let mut registered = self.registered.lock().await;
        for handles in registered.interval_handles.values_mut() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
        info!("orchestrator stopped");
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The settings store 5-field cron expressions; the scheduler wants a
/// seconds-first form.
fn scheduler_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_gain_a_seconds_field() {
        assert_eq!(scheduler_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(scheduler_cron("*/5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert_eq!(scheduler_cron("30 0 3 * * *"), "30 0 3 * * *");
    }

    #[test]
    fn lock_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        assert!(!flag.swap(true, Ordering::SeqCst));
        {
            let _guard = LockGuard(&flag);
        }
        assert!(!flag.load(Ordering::SeqCst));
        // A second pass can now take the lock
        assert!(!flag.swap(true, Ordering::SeqCst));
    }
}
