//! Episode stats repository (analysis audit trail)

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{EpisodeStats, Position};
use crate::Result;

#[derive(Clone)]
pub struct EpisodeStatsRepository {
    pool: PgPool,
}

impl EpisodeStatsRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert one analysis result. Re-running the identical analysis only
    /// moves `last_analyzed_at`; deletion stamps are preserved.
    pub async fn upsert(&self, stats: &EpisodeStats) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO episode_stats
                (show_rating_key, show_title, season_number, episode_number,
                 velocity_position, is_available, safe_to_delete, deletion_reason,
                 users_beyond, users_approaching, last_analyzed_at, deleted_at, deleted_by_cleanup)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (show_rating_key, season_number, episode_number) DO UPDATE SET
                show_title = EXCLUDED.show_title,
                velocity_position = EXCLUDED.velocity_position,
                is_available = EXCLUDED.is_available,
                safe_to_delete = EXCLUDED.safe_to_delete,
                deletion_reason = EXCLUDED.deletion_reason,
                users_beyond = EXCLUDED.users_beyond,
                users_approaching = EXCLUDED.users_approaching,
                last_analyzed_at = EXCLUDED.last_analyzed_at,
                deleted_at = COALESCE(episode_stats.deleted_at, EXCLUDED.deleted_at),
                deleted_by_cleanup = episode_stats.deleted_by_cleanup OR EXCLUDED.deleted_by_cleanup
            ",
        )
        .bind(&stats.show_rating_key)
        .bind(&stats.show_title)
        .bind(stats.season_number)
        .bind(stats.episode_number)
        .bind(stats.velocity_position.encoded())
        .bind(stats.is_available)
        .bind(stats.safe_to_delete)
        .bind(stats.deletion_reason.as_deref())
        .bind(serde_json::to_value(&stats.users_beyond)?)
        .bind(serde_json::to_value(&stats.users_approaching)?)
        .bind(stats.last_analyzed_at)
        .bind(stats.deleted_at)
        .bind(stats.deleted_by_cleanup)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that the episode's file was removed by the cleanup pass
    pub async fn mark_deleted(
        &self,
        show_rating_key: &str,
        season_number: i32,
        episode_number: i32,
        deleted_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE episode_stats
            SET deleted_at = $4, deleted_by_cleanup = TRUE, is_available = FALSE
            WHERE show_rating_key = $1 AND season_number = $2 AND episode_number = $3
            ",
        )
        .bind(show_rating_key)
        .bind(season_number)
        .bind(episode_number)
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_show(&self, show_rating_key: &str) -> Result<Vec<EpisodeStats>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM episode_stats
            WHERE show_rating_key = $1
            ORDER BY season_number, episode_number
            ",
        )
        .bind(show_rating_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_stats).collect()
    }

    /// Drop audit rows for episodes deleted before `cutoff`; returns rows removed.
    pub async fn prune_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM episode_stats WHERE deleted_at IS NOT NULL AND deleted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_stats(row: &PgRow) -> Result<EpisodeStats> {
    let users_beyond: serde_json::Value = row.try_get("users_beyond")?;
    let users_approaching: serde_json::Value = row.try_get("users_approaching")?;
    Ok(EpisodeStats {
        show_rating_key: row.try_get("show_rating_key")?,
        show_title: row.try_get("show_title")?,
        season_number: row.try_get("season_number")?,
        episode_number: row.try_get("episode_number")?,
        velocity_position: Position::from_encoded(row.try_get("velocity_position")?),
        is_available: row.try_get("is_available")?,
        safe_to_delete: row.try_get("safe_to_delete")?,
        deletion_reason: row.try_get("deletion_reason")?,
        users_beyond: serde_json::from_value(users_beyond)?,
        users_approaching: serde_json::from_value(users_approaching)?,
        last_analyzed_at: row.try_get("last_analyzed_at")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by_cleanup: row.try_get("deleted_by_cleanup")?,
    })
}
