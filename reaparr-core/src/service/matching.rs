//! TMDB id resolution for library items
//!
//! Resolution runs three methods in order: external ids on the item's
//! metadata, an exact title match against requests and watchlist entries,
//! and finally a leetspeak-normalized fuzzy match. The substitution table
//! is deliberate and stable: persisted lookups depend on it, so changing
//! an entry invalidates stored matches.

use crate::models::{LibraryItem, MediaRequest, MediaType, WatchlistEntry};

/// Normalize a title for fuzzy comparison: lowercase, substitute the fixed
/// digit table, strip everything non-alphanumeric.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(substitute_digit)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

const fn substitute_digit(c: char) -> char {
    match c {
        '1' => 'i',
        '0' => 'o',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '8' => 'b',
        other => other,
    }
}

/// A title that can vouch for a TMDB id
#[derive(Debug, Clone)]
pub struct TitleCandidate {
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
}

impl TitleCandidate {
    #[must_use]
    pub fn from_requests_and_watchlist(
        requests: &[MediaRequest],
        watchlist: &[WatchlistEntry],
    ) -> Vec<Self> {
        let mut candidates = Vec::with_capacity(requests.len() + watchlist.len());
        candidates.extend(requests.iter().map(|r| Self {
            tmdb_id: r.tmdb_id,
            media_type: r.media_type,
            title: r.title.clone(),
        }));
        candidates.extend(watchlist.iter().map(|w| Self {
            tmdb_id: w.tmdb_id,
            media_type: w.media_type,
            title: w.title.clone(),
        }));
        candidates
    }
}

/// Resolve a TMDB id for a library item.
#[must_use]
pub fn resolve_tmdb_id(item: &LibraryItem, candidates: &[TitleCandidate]) -> Option<i64> {
    // 1. External ids from the media server win outright
    if let Some(tmdb) = item.external_ids.tmdb {
        return Some(tmdb);
    }

    // 2. Exact title + media type
    let wanted = item.title.trim();
    for candidate in candidates {
        if candidate.media_type == item.media_type && candidate.title.trim().eq_ignore_ascii_case(wanted)
        {
            return Some(candidate.tmdb_id);
        }
    }

    // 3. Leetspeak-normalized equality
    let normalized = normalize_title(&item.title);
    if normalized.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|c| c.media_type == item.media_type && normalize_title(&c.title) == normalized)
        .map(|c| c.tmdb_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalIds;

    fn item(title: &str, media_type: MediaType, tmdb: Option<i64>) -> LibraryItem {
        LibraryItem {
            rating_key: "rk".to_string(),
            title: title.to_string(),
            year: None,
            media_type,
            library_id: "1".to_string(),
            added_at: None,
            updated_at: None,
            view_count: 0,
            last_viewed_at: None,
            external_ids: ExternalIds {
                tmdb,
                ..ExternalIds::default()
            },
            grandparent_rating_key: None,
            season_number: None,
            episode_number: None,
        }
    }

    fn candidate(title: &str, tmdb_id: i64, media_type: MediaType) -> TitleCandidate {
        TitleCandidate {
            tmdb_id,
            media_type,
            title: title.to_string(),
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        for title in ["S3v3n", "Ocean's 11", "M0nk 7he 8est", "Plain Title"] {
            let once = normalize_title(title);
            assert_eq!(normalize_title(&once), once);
        }
    }

    #[test]
    fn normalization_substitutes_the_fixed_table() {
        assert_eq!(normalize_title("S3v3n"), "seven");
        assert_eq!(normalize_title("7h3 0ffic3"), "theoffice");
        // 2, 6, 9 are not in the table and survive as digits
        assert_eq!(normalize_title("Route 66"), "route66");
    }

    #[test]
    fn external_id_wins_over_titles() {
        let item = item("Whatever", MediaType::Movie, Some(42));
        let candidates = vec![candidate("Whatever", 99, MediaType::Movie)];
        assert_eq!(resolve_tmdb_id(&item, &candidates), Some(42));
    }

    #[test]
    fn exact_match_requires_media_type() {
        let movie = item("Dune", MediaType::Movie, None);
        let candidates = vec![candidate("Dune", 438_631, MediaType::Show)];
        assert_eq!(resolve_tmdb_id(&movie, &candidates), None);
    }

    #[test]
    fn fuzzy_match_finds_leet_titles() {
        let show = item("Mr. R0b0t", MediaType::Show, None);
        let candidates = vec![candidate("Mr Robot", 62_560, MediaType::Show)];
        assert_eq!(resolve_tmdb_id(&show, &candidates), Some(62_560));
    }

    #[test]
    fn match_is_commutative_under_normalization() {
        let a = "7he Wire";
        let b = "The W1re";
        assert_eq!(normalize_title(a), normalize_title(b));
    }
}
