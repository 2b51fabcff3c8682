//! Watch event repository (append-only)

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::WatchEvent;
use crate::Result;

#[derive(Clone)]
pub struct WatchEventRepository {
    pool: PgPool,
}

impl WatchEventRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one event; returns false when the `(user, item, time)` tuple
    /// was already recorded.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        event: &WatchEvent,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO watch_events
                (user_id, rating_key, media_type, show_title, show_rating_key,
                 season_number, episode_number, watched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, rating_key, watched_at) DO NOTHING
            ",
        )
        .bind(&event.user_id)
        .bind(&event.rating_key)
        .bind(event.media_type.as_str())
        .bind(event.show_title.as_deref())
        .bind(event.show_rating_key.as_deref())
        .bind(event.season_number)
        .bind(event.episode_number)
        .bind(event.watched_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Prune events older than `cutoff`; returns the number removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM watch_events WHERE watched_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
