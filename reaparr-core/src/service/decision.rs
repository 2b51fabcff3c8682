//! Episode lifecycle decision rules
//!
//! Pure functions over an in-memory snapshot of one show's state. The
//! service layer assembles snapshots from the database and adapters; the
//! rules here never touch I/O, so every branch is unit-testable against a
//! pinned clock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{LifecycleSettings, Position};

/// One viewer's velocity state for the show under analysis
#[derive(Debug, Clone)]
pub struct ViewerState {
    pub user_id: String,
    pub user_name: String,
    pub current_position: Position,
    /// Episodes per day, >= 0
    pub velocity: f64,
    pub episodes_watched: i64,
    pub last_watched_at: Option<DateTime<Utc>>,
}

impl ViewerState {
    fn is_active(&self, now: DateTime<Utc>, settings: &LifecycleSettings) -> bool {
        self.last_watched_at
            .is_some_and(|at| (now - at).num_days() <= settings.active_viewer_days)
    }
}

/// One episode's state for the show under analysis
#[derive(Debug, Clone)]
pub struct EpisodeState {
    pub rating_key: Option<String>,
    pub position: Position,
    pub is_available: bool,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
}

/// A watchlist entry or acquisition request relevant to the grace rule
#[derive(Debug, Clone)]
pub struct GraceEntry {
    pub user_id: String,
    pub added_at: DateTime<Utc>,
    pub has_velocity_row: bool,
    pub current_position: Position,
}

/// Watchlist/request state feeding the grace check. `Unavailable` encodes
/// a load failure: this is the one rule where an error becomes policy, and
/// the policy is to protect.
#[derive(Debug, Clone)]
pub enum GraceInput {
    Known(Vec<GraceEntry>),
    Unavailable,
}

/// Everything the rules need to know about one show
#[derive(Debug, Clone)]
pub struct ShowSnapshot {
    pub show_rating_key: String,
    pub show_title: String,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub manually_protected: bool,
    pub grace: GraceInput,
    pub viewers: Vec<ViewerState>,
    pub episodes: Vec<EpisodeState>,
}

impl ShowSnapshot {
    #[must_use]
    pub fn active_viewers(&self, now: DateTime<Utc>, settings: &LifecycleSettings) -> Vec<&ViewerState> {
        self.viewers
            .iter()
            .filter(|v| v.is_active(now, settings))
            .collect()
    }
}

/// How a viewer's buffer was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferSource {
    Measured,
    Estimated,
    Default,
}

/// The span of positions ahead of a viewer that must stay available
#[derive(Debug, Clone)]
pub struct BufferZone {
    pub user_id: String,
    pub user_name: String,
    pub current_position: Position,
    pub protect_until: Position,
    pub source: BufferSource,
    pub velocity: f64,
}

impl BufferZone {
    /// An episode is in the buffer iff strictly ahead of the viewer and at
    /// or before the protect bound.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.current_position < position && position <= self.protect_until
    }
}

/// Compute one viewer's buffer zone.
#[must_use]
pub fn buffer_zone(viewer: &ViewerState, settings: &LifecycleSettings) -> BufferZone {
    let velocity_span = (viewer.velocity * settings.trim_days_ahead).ceil() as i64;

    let (source, episodes_ahead) =
        if viewer.episodes_watched >= settings.min_velocity_samples && viewer.velocity > 0.0 {
            (
                BufferSource::Measured,
                velocity_span + settings.protect_episodes_ahead,
            )
        } else if viewer.velocity > 0.0 {
            (
                BufferSource::Estimated,
                velocity_span.max(settings.unknown_velocity_buffer) + settings.protect_episodes_ahead,
            )
        } else {
            (
                BufferSource::Default,
                settings.unknown_velocity_buffer + settings.protect_episodes_ahead,
            )
        };

    let episodes_ahead = episodes_ahead.min(settings.max_episodes_ahead);
    let protect_until =
        Position::from_encoded(viewer.current_position.encoded() + episodes_ahead as i32);

    BufferZone {
        user_id: viewer.user_id.clone(),
        user_name: viewer.user_name.clone(),
        current_position: viewer.current_position,
        protect_until,
        source,
        velocity: viewer.velocity,
    }
}

/// Days until the viewer reaches `target`, assuming the default velocity
/// for viewers with no measurable rate.
#[must_use]
pub fn days_until_needed(viewer: &ViewerState, target: Position, settings: &LifecycleSettings) -> f64 {
    let velocity = if viewer.velocity > 0.0 {
        viewer.velocity
    } else {
        settings.default_velocity.max(f64::EPSILON)
    };
    f64::from(target.encoded() - viewer.current_position.encoded()) / velocity
}

/// The watchlist-grace protection check. Returns the protection reason, or
/// `None` when the show is not grace-protected.
#[must_use]
pub fn grace_protection(
    grace: &GraceInput,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> Option<String> {
    let entries = match grace {
        GraceInput::Unavailable => {
            return Some("Watchlist state unavailable, keeping show protected".to_string());
        }
        GraceInput::Known(entries) => entries,
    };

    for entry in entries {
        // Unstarted viewers keep the show protected while their entry is active
        if !entry.has_velocity_row {
            return Some(format!(
                "On watchlist for user {} who has not started watching",
                entry.user_id
            ));
        }
        // A velocity row with no progress gets the same protection; once the
        // history shows a real position the grace is lifted, inside the
        // window or not.
        if entry.current_position.is_start() {
            let in_window = (now - entry.added_at).num_days() < settings.watchlist_grace_days;
            return Some(if in_window {
                format!("Watchlist grace window active for user {}", entry.user_id)
            } else {
                format!(
                    "On watchlist for user {} who has not started watching",
                    entry.user_id
                )
            });
        }
    }
    None
}

/// Analysis outcome for one episode
#[derive(Debug, Clone)]
pub struct EpisodeVerdict {
    pub safe_to_delete: bool,
    pub reason: String,
    pub users_beyond: Vec<String>,
    pub users_approaching: Vec<String>,
}

impl EpisodeVerdict {
    fn not_safe(reason: impl Into<String>, beyond: Vec<String>, approaching: Vec<String>) -> Self {
        Self {
            safe_to_delete: false,
            reason: reason.into(),
            users_beyond: beyond,
            users_approaching: approaching,
        }
    }

    fn safe(reason: impl Into<String>, beyond: Vec<String>, approaching: Vec<String>) -> Self {
        Self {
            safe_to_delete: true,
            reason: reason.into(),
            users_beyond: beyond,
            users_approaching: approaching,
        }
    }
}

/// Decide whether one episode is safe to delete. Checks run in a fixed
/// order and the first match wins.
#[must_use]
pub fn decide_episode(
    show: &ShowSnapshot,
    episode: &EpisodeState,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> EpisodeVerdict {
    let active = show.active_viewers(now, settings);
    let zones: Vec<BufferZone> = active.iter().map(|v| buffer_zone(v, settings)).collect();
    let position = episode.position;

    let users_beyond: Vec<String> = active
        .iter()
        .filter(|v| v.current_position >= position)
        .map(|v| v.user_name.clone())
        .collect();
    let users_approaching: Vec<String> = active
        .iter()
        .filter(|v| v.current_position < position)
        .map(|v| v.user_name.clone())
        .collect();

    // 1. Manual protection overrides everything
    if show.manually_protected {
        return EpisodeVerdict::not_safe("Manually protected", users_beyond, users_approaching);
    }

    // 2. Watchlist grace / unstarted viewers (fail safe)
    if let Some(reason) = grace_protection(&show.grace, now, settings) {
        return EpisodeVerdict::not_safe(reason, users_beyond, users_approaching);
    }

    // 3. In any active viewer's buffer
    let holders: Vec<&str> = zones
        .iter()
        .filter(|z| z.contains(position))
        .map(|z| z.user_name.as_str())
        .collect();
    if !holders.is_empty() {
        return EpisodeVerdict::not_safe(
            format!("Within buffer zone for {}", holders.join(", ")),
            users_beyond,
            users_approaching,
        );
    }

    // 4. An approaching viewer needs it soon
    for (viewer, zone) in active.iter().zip(&zones) {
        if viewer.current_position >= position {
            continue;
        }
        let days = days_until_needed(viewer, position, settings);
        if days <= settings.velocity_buffer_days && zone.contains(position) {
            return EpisodeVerdict::not_safe(
                format!(
                    "{} reaches this episode in about {:.1} days",
                    viewer.user_name, days
                ),
                users_beyond,
                users_approaching,
            );
        }
    }

    // 5. Everyone with it buffered must have passed it
    if settings.require_all_users_watched {
        let waiting: Vec<&str> = active
            .iter()
            .zip(&zones)
            .filter(|(v, z)| z.contains(position) && v.current_position < position)
            .map(|(v, _)| v.user_name.as_str())
            .collect();
        if !waiting.is_empty() {
            return EpisodeVerdict::not_safe(
                format!("Waiting for {} to watch", waiting.join(", ")),
                users_beyond,
                users_approaching,
            );
        }
    }

    // 6. Recently watched episodes are kept for a cooling-off period
    if let Some(last_viewed) = episode.last_viewed_at {
        let days_since = (now - last_viewed).num_days();
        if days_since < settings.min_days_since_watch {
            return EpisodeVerdict::not_safe(
                format!("Watched {days_since} days ago"),
                users_beyond,
                users_approaching,
            );
        }
    }

    // 7. Far-ahead trim: unwatched episodes beyond every buffer
    if settings.trim_ahead_enabled && !active.is_empty() && episode.view_count == 0 {
        let has_activity = show.episodes.iter().any(|e| e.view_count > 0)
            || active.iter().any(|v| !v.current_position.is_start());
        if has_activity {
            // zones carries one entry per active viewer, so both maxima
            // exist whenever active is non-empty
            let fastest = active.iter().map(|v| v.current_position.encoded()).max();
            let widest = zones.iter().map(|z| z.protect_until.encoded()).max();
            if let (Some(fastest), Some(widest)) = (fastest, widest) {
                let max_protect = widest.min(fastest + settings.max_episodes_ahead as i32);
                if position.encoded() > max_protect {
                    return EpisodeVerdict::safe(
                        "Beyond every active viewer's buffer",
                        users_beyond,
                        users_approaching,
                    );
                }
            }
        }
    }

    // 8. Never watched and nobody has passed it
    let any_past = show
        .viewers
        .iter()
        .any(|v| v.current_position >= position);
    if episode.view_count == 0 && !any_past {
        return EpisodeVerdict::not_safe("Never watched", users_beyond, users_approaching);
    }

    // 9. Past all active viewers
    EpisodeVerdict::safe("Past all active viewers", users_beyond, users_approaching)
}

/// A pending need to have an episode back in the library before a viewer
/// reaches it.
#[derive(Debug, Clone)]
pub struct RedownloadNeed {
    pub position: Position,
    pub days_until_needed: f64,
    pub needed_by: DateTime<Utc>,
}

/// Whether an absent episode must be fetched back within `lead_days`.
#[must_use]
pub fn redownload_need(
    show: &ShowSnapshot,
    episode: &EpisodeState,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
    lead_days: f64,
) -> Option<RedownloadNeed> {
    if episode.is_available {
        return None;
    }
    let earliest = show
        .active_viewers(now, settings)
        .iter()
        .filter(|v| v.current_position < episode.position)
        .map(|v| days_until_needed(v, episode.position, settings))
        .fold(None::<f64>, |acc, d| {
            Some(acc.map_or(d, |best| best.min(d)))
        })?;

    if earliest <= lead_days {
        Some(RedownloadNeed {
            position: episode.position,
            days_until_needed: earliest,
            needed_by: now + Duration::seconds((earliest * 86_400.0) as i64),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(ts: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
            .expect("timestamp")
            .and_utc()
    }

    fn pos(season: i32, episode: i32) -> Position {
        Position::new(season, episode).expect("position")
    }

    fn viewer(name: &str, position: Position, velocity: f64, watched: i64, last: DateTime<Utc>) -> ViewerState {
        ViewerState {
            user_id: name.to_lowercase(),
            user_name: name.to_string(),
            current_position: position,
            velocity,
            episodes_watched: watched,
            last_watched_at: Some(last),
        }
    }

    fn episode(position: Position, view_count: i64, last_viewed: Option<DateTime<Utc>>) -> EpisodeState {
        EpisodeState {
            rating_key: Some(format!("ep-{}", position.encoded())),
            position,
            is_available: true,
            view_count,
            last_viewed_at: last_viewed,
        }
    }

    fn show(viewers: Vec<ViewerState>, episodes: Vec<EpisodeState>) -> ShowSnapshot {
        ShowSnapshot {
            show_rating_key: "100".to_string(),
            show_title: "Test Show".to_string(),
            tmdb_id: Some(42),
            tvdb_id: None,
            manually_protected: false,
            grace: GraceInput::Known(Vec::new()),
            viewers,
            episodes,
        }
    }

    fn test_settings() -> LifecycleSettings {
        LifecycleSettings {
            trim_days_ahead: 10.0,
            protect_episodes_ahead: 3,
            max_episodes_ahead: 20,
            min_days_since_watch: 15,
            ..LifecycleSettings::default()
        }
    }

    #[test]
    fn lone_caught_up_viewer() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(3, 5), 2.0, 50, now - Duration::days(1));

        let watched = episode(pos(3, 4), 1, Some(now - Duration::days(20)));
        let buffered = episode(pos(3, 10), 0, None);
        let far_ahead = episode(pos(4, 5), 0, None);
        let snapshot = show(
            vec![v],
            vec![watched.clone(), buffered.clone(), far_ahead.clone()],
        );

        let verdict = decide_episode(&snapshot, &watched, now, &settings);
        assert!(verdict.safe_to_delete, "{}", verdict.reason);
        assert_eq!(verdict.reason, "Past all active viewers");

        // protect_until = 305 + min(2*10+3, 20) = 325, so S3E10 is buffered
        let verdict = decide_episode(&snapshot, &buffered, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert!(verdict.reason.contains("buffer"));

        // S4E5 = 405 > 325 and unwatched: trimmed
        let verdict = decide_episode(&snapshot, &far_ahead, now, &settings);
        assert!(verdict.safe_to_delete, "{}", verdict.reason);
        assert!(verdict.reason.contains("buffer"));
    }

    #[test]
    fn lagging_viewer_far_behind_does_not_protect() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let alice = viewer("Alice", pos(4, 6), 3.0, 80, now - Duration::days(1));
        let bob = viewer("Bob", pos(3, 2), 0.5, 10, now - Duration::days(2));

        // Bob's buffer: 302 + min(ceil(0.5*10)+3, 20) = 310; S4E1 = 401 is outside,
        // and daysUntilNeeded = (401-302)/0.5 = 198 days
        let target = episode(pos(4, 1), 2, Some(now - Duration::days(30)));
        let snapshot = show(vec![alice, bob], vec![target.clone()]);

        let verdict = decide_episode(&snapshot, &target, now, &settings);
        assert!(verdict.safe_to_delete, "{}", verdict.reason);
        assert_eq!(verdict.users_beyond, vec!["Alice".to_string()]);
        assert_eq!(verdict.users_approaching, vec!["Bob".to_string()]);
    }

    #[test]
    fn watchlist_unstarted_protects_every_episode() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(3, 5), 2.0, 50, now - Duration::days(1));
        let e = episode(pos(1, 1), 1, Some(now - Duration::days(100)));
        let mut snapshot = show(vec![v], vec![e.clone()]);
        snapshot.grace = GraceInput::Known(vec![GraceEntry {
            user_id: "carol".to_string(),
            added_at: now - Duration::days(3),
            has_velocity_row: false,
            current_position: pos(0, 0),
        }]);

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert!(verdict.reason.contains("not started"));
    }

    #[test]
    fn grace_lifts_once_viewer_progresses() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let grace = GraceInput::Known(vec![GraceEntry {
            user_id: "carol".to_string(),
            added_at: now - Duration::days(3),
            has_velocity_row: true,
            current_position: pos(1, 4),
        }]);
        assert!(grace_protection(&grace, now, &settings).is_none());
    }

    #[test]
    fn grace_failure_fails_safe() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(9, 9), 2.0, 50, now - Duration::days(1));
        let e = episode(pos(1, 1), 5, Some(now - Duration::days(400)));
        let mut snapshot = show(vec![v], vec![e.clone()]);
        snapshot.grace = GraceInput::Unavailable;

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert!(verdict.reason.contains("protected"));
    }

    #[test]
    fn manual_protection_overrides_everything() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(9, 9), 2.0, 50, now - Duration::days(1));
        let e = episode(pos(1, 1), 5, Some(now - Duration::days(400)));
        let mut snapshot = show(vec![v], vec![e.clone()]);
        snapshot.manually_protected = true;

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert_eq!(verdict.reason, "Manually protected");
    }

    #[test]
    fn recently_watched_episode_is_kept() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(3, 5), 2.0, 50, now - Duration::days(1));
        let e = episode(pos(3, 1), 1, Some(now - Duration::days(4)));
        let snapshot = show(vec![v], vec![e.clone()]);

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert!(verdict.reason.contains("days ago"));
    }

    #[test]
    fn never_watched_episode_with_no_viewer_past_is_kept() {
        let now = at("2024-06-01 12:00:00");
        let mut settings = test_settings();
        settings.trim_ahead_enabled = false;
        let v = viewer("Dana", pos(1, 2), 0.0, 1, now - Duration::days(1));
        let e = episode(pos(5, 1), 0, None);
        let snapshot = show(vec![v], vec![e.clone()]);

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
        assert_eq!(verdict.reason, "Never watched");
    }

    #[test]
    fn require_all_users_watched_holds_buffered_episodes() {
        let now = at("2024-06-01 12:00:00");
        let mut settings = test_settings();
        settings.require_all_users_watched = true;
        let alice = viewer("Alice", pos(2, 9), 2.0, 40, now - Duration::days(1));
        let bob = viewer("Bob", pos(2, 1), 1.0, 20, now - Duration::days(1));
        // In Bob's buffer (201 + min(13, 20) = 214) and unwatched by him
        let e = episode(pos(2, 5), 1, Some(now - Duration::days(60)));
        let snapshot = show(vec![alice, bob], vec![e.clone()]);

        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(!verdict.safe_to_delete);
    }

    #[test]
    fn buffer_zone_caps_at_max_episodes_ahead() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let speedy = viewer("Speedy", pos(1, 1), 12.0, 90, now);
        let zone = buffer_zone(&speedy, &settings);
        assert_eq!(
            zone.protect_until.encoded(),
            zone.current_position.encoded() + settings.max_episodes_ahead as i32
        );
        assert_eq!(zone.source, BufferSource::Measured);
    }

    #[test]
    fn buffer_sources_follow_sample_count() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();

        let sampled = viewer("A", pos(1, 1), 1.0, 5, now);
        assert_eq!(buffer_zone(&sampled, &settings).source, BufferSource::Measured);

        let thin = viewer("B", pos(1, 1), 1.0, 1, now);
        let zone = buffer_zone(&thin, &settings);
        assert_eq!(zone.source, BufferSource::Estimated);
        // max(ceil(1*10), 5) + 3 capped at 20
        assert_eq!(zone.protect_until.encoded(), 101 + 13);

        let unknown = viewer("C", pos(1, 1), 0.0, 0, now);
        let zone = buffer_zone(&unknown, &settings);
        assert_eq!(zone.source, BufferSource::Default);
        assert_eq!(
            zone.protect_until.encoded(),
            101 + (settings.unknown_velocity_buffer + settings.protect_episodes_ahead) as i32
        );
    }

    #[test]
    fn inactive_viewers_do_not_protect() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let idle = viewer("Idle", pos(1, 1), 2.0, 50, now - Duration::days(90));
        let e = episode(pos(1, 2), 3, Some(now - Duration::days(200)));
        let snapshot = show(vec![idle], vec![e.clone()]);

        // The idle viewer's would-be buffer covers this episode, but a
        // 90-day-old last watch means no active viewers at all.
        let verdict = decide_episode(&snapshot, &e, now, &settings);
        assert!(verdict.safe_to_delete, "{}", verdict.reason);
    }

    #[test]
    fn emergency_need_detected_for_absent_episode() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        // 18 hours away at 4 eps/day: 3 episodes ahead
        let v = viewer("Dana", pos(4, 2), 4.0, 60, now - Duration::hours(2));
        let mut e = episode(pos(4, 5), 0, None);
        e.is_available = false;
        let snapshot = show(vec![v], vec![e.clone()]);

        let need = redownload_need(
            &snapshot,
            &e,
            now,
            &settings,
            settings.emergency_buffer_hours / 24.0,
        )
        .expect("need");
        assert!(need.days_until_needed <= 1.0);
        assert!(need.needed_by > now);
    }

    #[test]
    fn available_episode_never_needs_redownload() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        let v = viewer("Dana", pos(4, 2), 4.0, 60, now);
        let e = episode(pos(4, 5), 0, None);
        let snapshot = show(vec![v], vec![e.clone()]);
        assert!(redownload_need(&snapshot, &e, now, &settings, 3.0).is_none());
    }

    #[test]
    fn protect_until_never_exceeds_position_plus_cap() {
        let now = at("2024-06-01 12:00:00");
        let settings = test_settings();
        for velocity in [0.0, 0.3, 1.0, 2.5, 50.0] {
            for watched in [0, 1, 3, 10] {
                let v = viewer("V", pos(2, 10), velocity, watched, now);
                let zone = buffer_zone(&v, &settings);
                assert!(
                    zone.protect_until.encoded()
                        <= v.current_position.encoded() + settings.max_episodes_ahead as i32
                );
            }
        }
    }
}
