use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Encoded season/episode pair: `season * 100 + episode`.
///
/// All position comparisons in the engine use this encoding. Episode
/// numbers of 100 and above cannot be represented and are rejected at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(i32);

impl Position {
    pub fn new(season: i32, episode: i32) -> Result<Self> {
        if season < 0 || episode < 0 {
            return Err(Error::InvalidInput(format!(
                "negative season/episode: S{season}E{episode}"
            )));
        }
        if episode >= 100 {
            return Err(Error::InvalidInput(format!(
                "episode number {episode} does not fit the position encoding"
            )));
        }
        Ok(Self(season * 100 + episode))
    }

    #[must_use]
    pub const fn from_encoded(encoded: i32) -> Self {
        Self(encoded)
    }

    #[must_use]
    pub const fn encoded(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn season(self) -> i32 {
        self.0 / 100
    }

    #[must_use]
    pub const fn episode(self) -> i32 {
        self.0 % 100
    }

    /// Position zero means "has not started watching".
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{:02}E{:02}", self.season(), self.episode())
    }
}

/// Key identifying a show in velocity tracking: the show's rating key when
/// one is associable, otherwise a deterministic hash of its title.
pub type ShowKey = String;

/// Resolve the show key for velocity tracking.
///
/// The hash fallback is a compatibility hazard (collisions, rename drift),
/// so it is confined to this one function and every use is logged.
#[must_use]
pub fn resolve_show_key(rating_key: Option<&str>, title: &str) -> ShowKey {
    match rating_key {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            let hashed = format!("t{:08x}", fnv1a_32(title.to_lowercase().as_bytes()));
            warn!(title, show_key = %hashed, "no rating key for show, falling back to title hash");
            hashed
        }
    }
}

/// 32-bit FNV-1a. Stable across runs and platforms; persisted show keys
/// depend on this exact function.
const fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// Per-user, per-show viewing state derived from watch history.
///
/// `current_position` and `last_watched_at` are monotonic: the repository
/// merge keeps the greater value under out-of-order event arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVelocity {
    pub user_id: String,
    pub show_key: ShowKey,
    pub show_title: String,
    pub current_position: Position,
    pub current_season: i32,
    pub current_episode: i32,
    /// Episodes per day, >= 0
    pub episodes_per_day: f64,
    pub episodes_watched: i64,
    pub last_watched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserVelocity {
    /// Whether the viewer counts as active for this show at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>, active_viewer_days: i64) -> bool {
        self.last_watched_at
            .is_some_and(|at| (now - at).num_days() <= active_viewer_days)
    }
}

/// Append-only record of a velocity observation; bounded to the most
/// recent 50 per `(user, show)` by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocitySnapshot {
    pub user_id: String,
    pub show_key: ShowKey,
    pub velocity: f64,
    pub position: Position,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips_for_valid_episodes() {
        for season in [0, 1, 3, 12] {
            for episode in [1, 5, 42, 99] {
                let pos = Position::new(season, episode).unwrap();
                assert_eq!(pos.season(), season);
                assert_eq!(pos.episode(), episode);
                assert_eq!(Position::from_encoded(pos.encoded()), pos);
            }
        }
    }

    #[test]
    fn position_rejects_episode_100() {
        assert!(Position::new(1, 100).is_err());
        assert!(Position::new(1, 250).is_err());
        assert!(Position::new(-1, 2).is_err());
    }

    #[test]
    fn show_key_prefers_rating_key() {
        assert_eq!(resolve_show_key(Some("12345"), "Some Show"), "12345");
    }

    #[test]
    fn show_key_hash_is_deterministic_and_case_insensitive() {
        let a = resolve_show_key(None, "Breaking Bad");
        let b = resolve_show_key(None, "breaking bad");
        let c = resolve_show_key(Some(""), "Breaking Bad");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.starts_with('t'));
    }

    #[test]
    fn distinct_titles_hash_apart() {
        assert_ne!(
            resolve_show_key(None, "Breaking Bad"),
            resolve_show_key(None, "Better Call Saul")
        );
    }
}
