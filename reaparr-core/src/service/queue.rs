//! In-process redownload queue
//!
//! Holds episode fetch intents between the passes that discover them and
//! the queue processor that calls the TV downloader. Entries are deduped on
//! `(show, season, episode)`; emergency entries jump to the front. The
//! queue is not persisted: a restart loses only intents the next pass
//! re-derives.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One episode the downloader should bring back
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeFetchRequest {
    pub show_rating_key: String,
    pub show_title: String,
    pub tvdb_id: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub season_number: i32,
    pub episode_number: i32,
    pub needed_by: DateTime<Utc>,
    pub emergency: bool,
}

impl EpisodeFetchRequest {
    fn key(&self) -> (String, i32, i32) {
        (
            self.show_rating_key.clone(),
            self.season_number,
            self.episode_number,
        )
    }
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<EpisodeFetchRequest>,
    keys: HashSet<(String, i32, i32)>,
}

#[derive(Default)]
pub struct RedownloadQueue {
    inner: Mutex<QueueInner>,
}

impl RedownloadQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request. Returns false when the episode was already
    /// queued; an emergency re-queue of a normal entry promotes it instead.
    pub fn push(&self, request: EpisodeFetchRequest) -> bool {
        let mut inner = self.inner.lock();
        let key = request.key();
        if inner.keys.contains(&key) {
            if request.emergency {
                self.promote_locked(&mut inner, &key);
            }
            return false;
        }
        inner.keys.insert(key);
        if request.emergency {
            inner.entries.push_front(request);
        } else {
            inner.entries.push_back(request);
        }
        true
    }

    fn promote_locked(&self, inner: &mut QueueInner, key: &(String, i32, i32)) {
        if let Some(index) = inner.entries.iter().position(|e| &e.key() == key) {
            if let Some(mut entry) = inner.entries.remove(index) {
                entry.emergency = true;
                inner.entries.push_front(entry);
            }
        }
    }

    /// Move every entry matching the predicate to the front of the queue.
    /// Returns the number of entries promoted.
    pub fn promote_where<F: Fn(&EpisodeFetchRequest) -> bool>(&self, predicate: F) -> usize {
        let mut inner = self.inner.lock();
        let mut promoted = Vec::new();
        let mut index = 0;
        while index < inner.entries.len() {
            if !inner.entries[index].emergency && predicate(&inner.entries[index]) {
                if let Some(mut entry) = inner.entries.remove(index) {
                    entry.emergency = true;
                    promoted.push(entry);
                    continue;
                }
            }
            index += 1;
        }
        let count = promoted.len();
        for entry in promoted.into_iter().rev() {
            inner.entries.push_front(entry);
        }
        count
    }

    /// Take everything, clearing the dedupe set
    pub fn drain(&self) -> Vec<EpisodeFetchRequest> {
        let mut inner = self.inner.lock();
        inner.keys.clear();
        inner.entries.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(show: &str, season: i32, episode: i32, emergency: bool) -> EpisodeFetchRequest {
        EpisodeFetchRequest {
            show_rating_key: show.to_string(),
            show_title: show.to_string(),
            tvdb_id: None,
            tmdb_id: None,
            season_number: season,
            episode_number: episode,
            needed_by: DateTime::<Utc>::MIN_UTC,
            emergency,
        }
    }

    #[test]
    fn duplicate_pushes_enqueue_once() {
        let queue = RedownloadQueue::new();
        assert!(queue.push(request("s", 4, 5, true)));
        assert!(!queue.push(request("s", 4, 5, true)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn emergency_entries_jump_the_line() {
        let queue = RedownloadQueue::new();
        queue.push(request("a", 1, 1, false));
        queue.push(request("b", 1, 1, true));
        let drained = queue.drain();
        assert_eq!(drained[0].show_rating_key, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn emergency_repush_promotes_existing_entry() {
        let queue = RedownloadQueue::new();
        queue.push(request("a", 1, 1, false));
        queue.push(request("b", 1, 1, false));
        assert!(!queue.push(request("b", 1, 1, true)));
        let drained = queue.drain();
        assert_eq!(drained[0].show_rating_key, "b");
        assert!(drained[0].emergency);
    }

    #[test]
    fn promote_where_moves_matching_entries() {
        let queue = RedownloadQueue::new();
        queue.push(request("a", 1, 1, false));
        queue.push(request("b", 1, 1, false));
        queue.push(request("c", 1, 1, false));
        let promoted = queue.promote_where(|e| e.show_rating_key == "c");
        assert_eq!(promoted, 1);
        let drained = queue.drain();
        assert_eq!(drained[0].show_rating_key, "c");
    }
}
