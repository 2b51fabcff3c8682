//! User velocity and velocity snapshot repositories

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{Position, UserVelocity, VelocitySnapshot};
use crate::Result;

/// One observation from a batch of watch-history events, to be merged into
/// the stored velocity row.
#[derive(Debug, Clone)]
pub struct VelocityObservation {
    pub user_id: String,
    pub show_key: String,
    pub show_title: String,
    pub position: Position,
    /// None keeps the stored velocity (fewer than two events in the batch)
    pub velocity: Option<f64>,
    /// Newly recorded events in this batch
    pub new_events: i64,
    pub last_watched_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserVelocityRepository {
    pool: PgPool,
}

impl UserVelocityRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Monotonic merge: position and last-watched never go backwards, even
    /// when batches arrive out of order. Done in SQL so the guarantee holds
    /// under concurrent ingestion.
    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        obs: &VelocityObservation,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO user_velocities
                (user_id, show_key, show_title, current_position, current_season,
                 current_episode, episodes_per_day, episodes_watched, last_watched_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, 0), $8, $9, NOW())
            ON CONFLICT (user_id, show_key) DO UPDATE SET
                show_title = CASE
                    WHEN EXCLUDED.show_title <> '' THEN EXCLUDED.show_title
                    ELSE user_velocities.show_title
                END,
                current_season = CASE
                    WHEN EXCLUDED.current_position > user_velocities.current_position
                        THEN EXCLUDED.current_season
                    ELSE user_velocities.current_season
                END,
                current_episode = CASE
                    WHEN EXCLUDED.current_position > user_velocities.current_position
                        THEN EXCLUDED.current_episode
                    ELSE user_velocities.current_episode
                END,
                current_position = GREATEST(user_velocities.current_position, EXCLUDED.current_position),
                episodes_per_day = COALESCE($7, user_velocities.episodes_per_day),
                episodes_watched = user_velocities.episodes_watched + $8,
                last_watched_at = GREATEST(user_velocities.last_watched_at, EXCLUDED.last_watched_at),
                updated_at = NOW()
            ",
        )
        .bind(&obs.user_id)
        .bind(&obs.show_key)
        .bind(&obs.show_title)
        .bind(obs.position.encoded())
        .bind(obs.position.season())
        .bind(obs.position.episode())
        .bind(obs.velocity)
        .bind(obs.new_events)
        .bind(obs.last_watched_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, show_key: &str) -> Result<Option<UserVelocity>> {
        let row = sqlx::query("SELECT * FROM user_velocities WHERE user_id = $1 AND show_key = $2")
            .bind(user_id)
            .bind(show_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_velocity(&r)).transpose()
    }

    pub async fn list_for_show(&self, show_key: &str) -> Result<Vec<UserVelocity>> {
        let rows = sqlx::query("SELECT * FROM user_velocities WHERE show_key = $1")
            .bind(show_key)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_velocity).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<UserVelocity>> {
        let rows = sqlx::query("SELECT * FROM user_velocities")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_velocity).collect()
    }

    /// Rows whose viewer has been idle since before `cutoff`
    pub async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM user_velocities
             WHERE last_watched_at IS NULL OR last_watched_at < $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM user_velocities
             WHERE last_watched_at IS NULL OR last_watched_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_velocity(row: &PgRow) -> Result<UserVelocity> {
    Ok(UserVelocity {
        user_id: row.try_get("user_id")?,
        show_key: row.try_get("show_key")?,
        show_title: row.try_get("show_title")?,
        current_position: Position::from_encoded(row.try_get("current_position")?),
        current_season: row.try_get("current_season")?,
        current_episode: row.try_get("current_episode")?,
        episodes_per_day: row.try_get("episodes_per_day")?,
        episodes_watched: row.try_get("episodes_watched")?,
        last_watched_at: row.try_get("last_watched_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct VelocitySnapshotRepository {
    pool: PgPool,
}

impl VelocitySnapshotRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, snapshot: &VelocitySnapshot) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO velocity_snapshots (user_id, show_key, velocity, velocity_position, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&snapshot.user_id)
        .bind(&snapshot.show_key)
        .bind(snapshot.velocity)
        .bind(snapshot.position.encoded())
        .bind(snapshot.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent `n` snapshots, newest first
    pub async fn last_n(&self, user_id: &str, show_key: &str, n: i64) -> Result<Vec<VelocitySnapshot>> {
        let rows = sqlx::query(
            r"
            SELECT user_id, show_key, velocity, velocity_position, recorded_at
            FROM velocity_snapshots
            WHERE user_id = $1 AND show_key = $2
            ORDER BY recorded_at DESC
            LIMIT $3
            ",
        )
        .bind(user_id)
        .bind(show_key)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(VelocitySnapshot {
                    user_id: row.try_get("user_id")?,
                    show_key: row.try_get("show_key")?,
                    velocity: row.try_get("velocity")?,
                    position: Position::from_encoded(row.try_get("velocity_position")?),
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }

    /// Keep only the newest `keep` snapshots for the pair; returns rows removed.
    pub async fn prune_keep_latest(&self, user_id: &str, show_key: &str, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM velocity_snapshots
            WHERE id IN (
                SELECT id FROM velocity_snapshots
                WHERE user_id = $1 AND show_key = $2
                ORDER BY recorded_at DESC
                OFFSET $3
            )
            ",
        )
        .bind(user_id)
        .bind(show_key)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Prune every pair beyond the per-pair bound in one statement; returns
    /// rows removed.
    pub async fn prune_all_keep_latest(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM velocity_snapshots
            WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY user_id, show_key ORDER BY recorded_at DESC
                    ) AS rank
                    FROM velocity_snapshots
                ) ranked
                WHERE ranked.rank > $1
            )
            ",
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
