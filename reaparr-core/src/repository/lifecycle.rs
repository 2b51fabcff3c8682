//! Lifecycle record repository

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{LifecycleRecord, LifecycleStatus, MediaType};
use crate::{Error, Result};

#[derive(Clone)]
pub struct LifecycleRepository {
    pool: PgPool,
}

impl LifecycleRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        record: &LifecycleRecord,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO lifecycle_records
                (tmdb_id, media_type, rating_key, title, status, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tmdb_id, media_type) DO UPDATE SET
                rating_key = COALESCE(EXCLUDED.rating_key, lifecycle_records.rating_key),
                title = CASE
                    WHEN EXCLUDED.title <> '' THEN EXCLUDED.title
                    ELSE lifecycle_records.title
                END,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            ",
        )
        .bind(record.tmdb_id)
        .bind(record.media_type.as_str())
        .bind(record.rating_key.as_deref())
        .bind(&record.title)
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .bind(record.deleted_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get(&self, tmdb_id: i64, media_type: MediaType) -> Result<Option<LifecycleRecord>> {
        let row = sqlx::query("SELECT * FROM lifecycle_records WHERE tmdb_id = $1 AND media_type = $2")
            .bind(tmdb_id)
            .bind(media_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn find_by_rating_key(&self, rating_key: &str) -> Result<Option<LifecycleRecord>> {
        let row = sqlx::query("SELECT * FROM lifecycle_records WHERE rating_key = $1")
            .bind(rating_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn mark_deleted_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        tmdb_id: i64,
        media_type: MediaType,
        deleted_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE lifecycle_records
            SET status = 'deleted', deleted_at = $3, updated_at = $3
            WHERE tmdb_id = $1 AND media_type = $2
            ",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .bind(deleted_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Result<LifecycleRecord> {
    let media_type_raw: String = row.try_get("media_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(LifecycleRecord {
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: MediaType::from_str(&media_type_raw)
            .ok_or_else(|| Error::Internal(format!("unknown media_type in row: {media_type_raw}")))?,
        rating_key: row.try_get("rating_key")?,
        title: row.try_get("title")?,
        status: LifecycleStatus::from_str(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown lifecycle status: {status_raw}")))?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}
