use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What to do when a viewer's velocity jumps past the change threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityChangeAction {
    Redownload,
    Alert,
    Both,
}

impl VelocityChangeAction {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "redownload" => Some(Self::Redownload),
            "alert" => Some(Self::Alert),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Redownload => "redownload",
            Self::Alert => "alert",
            Self::Both => "both",
        }
    }

    #[must_use]
    pub const fn triggers_redownload(self) -> bool {
        matches!(self, Self::Redownload | Self::Both)
    }

    #[must_use]
    pub const fn triggers_alert(self) -> bool {
        matches!(self, Self::Alert | Self::Both)
    }
}

/// Behavioral knobs for the lifecycle engine, stored as rows in the
/// `settings` table and snapshotted at the start of every pass. Missing or
/// unparsable rows fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    pub enabled: bool,
    pub min_days_since_watch: i64,
    pub velocity_buffer_days: f64,
    pub protect_episodes_ahead: i64,
    pub active_viewer_days: i64,
    pub require_all_users_watched: bool,

    pub proactive_redownload: bool,
    pub redownload_lead_days: f64,
    pub redownload_enabled: bool,
    pub emergency_buffer_hours: f64,

    pub trim_ahead_enabled: bool,
    pub trim_days_ahead: f64,
    pub max_episodes_ahead: i64,

    pub unknown_velocity_buffer: i64,
    pub min_velocity_samples: i64,
    /// Episodes-per-day assumed for viewers with no measurable velocity
    pub default_velocity: f64,

    pub watchlist_grace_days: i64,

    pub velocity_monitoring_enabled: bool,
    /// Minutes between velocity-monitor runs
    pub velocity_check_interval: i64,
    /// Relative change (0.5 = 50%) that counts as a velocity shift
    pub velocity_change_threshold: f64,
    pub velocity_change_action: VelocityChangeAction,

    /// Days an unwatched movie is kept before the movie pass may delete it
    pub unwatched_movie_retention_days: i64,

    // Cadences for the orchestrator's jobs. Cron fields are 5-field
    // expressions evaluated in the configured timezone.
    pub main_analyzer_cron: String,
    pub queue_processor_cron: String,
    pub log_cleanup_cron: String,
    pub velocity_cleanup_cron: String,
    pub redownload_interval_minutes: i64,
    pub watchlist_priority_interval_minutes: i64,
    pub sync_interval_seconds: i64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_days_since_watch: 15,
            velocity_buffer_days: 7.0,
            protect_episodes_ahead: 3,
            active_viewer_days: 30,
            require_all_users_watched: false,

            proactive_redownload: true,
            redownload_lead_days: 3.0,
            redownload_enabled: true,
            emergency_buffer_hours: 24.0,

            trim_ahead_enabled: true,
            trim_days_ahead: 10.0,
            max_episodes_ahead: 20,

            unknown_velocity_buffer: 5,
            min_velocity_samples: 3,
            default_velocity: 1.0,

            watchlist_grace_days: 14,

            velocity_monitoring_enabled: true,
            velocity_check_interval: 120,
            velocity_change_threshold: 0.5,
            velocity_change_action: VelocityChangeAction::Redownload,

            unwatched_movie_retention_days: 90,

            main_analyzer_cron: "0 2 * * *".to_string(),
            queue_processor_cron: "0 * * * *".to_string(),
            log_cleanup_cron: "0 3 * * *".to_string(),
            velocity_cleanup_cron: "30 3 * * *".to_string(),
            redownload_interval_minutes: 360,
            watchlist_priority_interval_minutes: 1,
            sync_interval_seconds: 60,
        }
    }
}

impl LifecycleSettings {
    /// Build a settings snapshot from raw `settings` rows. Unknown keys are
    /// ignored; unparsable values are logged and replaced by the default.
    #[must_use]
    pub fn from_rows(rows: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();

        parse_into(rows, "lifecycle.enabled", &mut settings.enabled);
        parse_into(
            rows,
            "lifecycle.min_days_since_watch",
            &mut settings.min_days_since_watch,
        );
        parse_into(
            rows,
            "lifecycle.velocity_buffer_days",
            &mut settings.velocity_buffer_days,
        );
        parse_into(
            rows,
            "lifecycle.protect_episodes_ahead",
            &mut settings.protect_episodes_ahead,
        );
        parse_into(
            rows,
            "lifecycle.active_viewer_days",
            &mut settings.active_viewer_days,
        );
        parse_into(
            rows,
            "lifecycle.require_all_users_watched",
            &mut settings.require_all_users_watched,
        );
        parse_into(
            rows,
            "redownload.proactive",
            &mut settings.proactive_redownload,
        );
        parse_into(
            rows,
            "redownload.lead_days",
            &mut settings.redownload_lead_days,
        );
        parse_into(rows, "redownload.enabled", &mut settings.redownload_enabled);
        parse_into(
            rows,
            "redownload.emergency_buffer_hours",
            &mut settings.emergency_buffer_hours,
        );
        parse_into(rows, "trim.enabled", &mut settings.trim_ahead_enabled);
        parse_into(rows, "trim.days_ahead", &mut settings.trim_days_ahead);
        parse_into(
            rows,
            "trim.max_episodes_ahead",
            &mut settings.max_episodes_ahead,
        );
        parse_into(
            rows,
            "velocity.unknown_buffer",
            &mut settings.unknown_velocity_buffer,
        );
        parse_into(
            rows,
            "velocity.min_samples",
            &mut settings.min_velocity_samples,
        );
        parse_into(rows, "velocity.default", &mut settings.default_velocity);
        parse_into(
            rows,
            "watchlist.grace_days",
            &mut settings.watchlist_grace_days,
        );
        parse_into(
            rows,
            "velocity.monitoring_enabled",
            &mut settings.velocity_monitoring_enabled,
        );
        parse_into(
            rows,
            "velocity.check_interval",
            &mut settings.velocity_check_interval,
        );
        parse_into(
            rows,
            "velocity.change_threshold",
            &mut settings.velocity_change_threshold,
        );
        if let Some(raw) = rows.get("velocity.change_action") {
            match VelocityChangeAction::from_str(raw) {
                Some(action) => settings.velocity_change_action = action,
                None => warn!(key = "velocity.change_action", value = %raw, "unparsable setting, using default"),
            }
        }
        parse_into(
            rows,
            "movies.unwatched_retention_days",
            &mut settings.unwatched_movie_retention_days,
        );

        parse_into(
            rows,
            "schedule.main_analyzer_cron",
            &mut settings.main_analyzer_cron,
        );
        parse_into(
            rows,
            "schedule.queue_processor_cron",
            &mut settings.queue_processor_cron,
        );
        parse_into(
            rows,
            "schedule.log_cleanup_cron",
            &mut settings.log_cleanup_cron,
        );
        parse_into(
            rows,
            "schedule.velocity_cleanup_cron",
            &mut settings.velocity_cleanup_cron,
        );
        parse_into(
            rows,
            "schedule.redownload_interval_minutes",
            &mut settings.redownload_interval_minutes,
        );
        parse_into(
            rows,
            "schedule.watchlist_priority_interval_minutes",
            &mut settings.watchlist_priority_interval_minutes,
        );
        parse_into(
            rows,
            "schedule.sync_interval_seconds",
            &mut settings.sync_interval_seconds,
        );

        settings
    }
}

fn parse_into<T: std::str::FromStr>(rows: &HashMap<String, String>, key: &str, slot: &mut T) {
    if let Some(raw) = rows.get(key) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "unparsable setting, using default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = LifecycleSettings::default();
        assert_eq!(s.min_days_since_watch, 15);
        assert!((s.velocity_buffer_days - 7.0).abs() < f64::EPSILON);
        assert_eq!(s.protect_episodes_ahead, 3);
        assert_eq!(s.active_viewer_days, 30);
        assert!((s.redownload_lead_days - 3.0).abs() < f64::EPSILON);
        assert!((s.emergency_buffer_hours - 24.0).abs() < f64::EPSILON);
        assert_eq!(s.max_episodes_ahead, 20);
        assert_eq!(s.min_velocity_samples, 3);
        assert_eq!(s.watchlist_grace_days, 14);
        assert!((s.velocity_change_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rows_override_defaults_and_bad_values_fall_back() {
        let mut rows = HashMap::new();
        rows.insert(
            "lifecycle.min_days_since_watch".to_string(),
            "30".to_string(),
        );
        rows.insert("trim.enabled".to_string(), "false".to_string());
        rows.insert(
            "velocity.change_threshold".to_string(),
            "not-a-number".to_string(),
        );
        rows.insert("velocity.change_action".to_string(), "both".to_string());

        let s = LifecycleSettings::from_rows(&rows);
        assert_eq!(s.min_days_since_watch, 30);
        assert!(!s.trim_ahead_enabled);
        assert!((s.velocity_change_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.velocity_change_action, VelocityChangeAction::Both);
    }
}
