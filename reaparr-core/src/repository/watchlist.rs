//! Watchlist and media request repositories

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{MediaRequest, MediaType, RequestStatus, WatchlistEntry};
use crate::{Error, Result};

#[derive(Clone)]
pub struct WatchlistRepository {
    pool: PgPool,
}

impl WatchlistRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_active(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query("SELECT * FROM watchlist_entries WHERE is_active")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn list_active_for(
        &self,
        tmdb_id: i64,
        media_type: MediaType,
    ) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM watchlist_entries WHERE is_active AND tmdb_id = $1 AND media_type = $2",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn deactivate(&self, user_id: &str, tmdb_id: i64, media_type: MediaType) -> Result<()> {
        sqlx::query(
            r"
            UPDATE watchlist_entries SET is_active = FALSE
            WHERE user_id = $1 AND tmdb_id = $2 AND media_type = $3
            ",
        )
        .bind(user_id)
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_entry(row: &PgRow) -> Result<WatchlistEntry> {
    let media_type_raw: String = row.try_get("media_type")?;
    Ok(WatchlistEntry {
        user_id: row.try_get("user_id")?,
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: MediaType::from_str(&media_type_raw)
            .ok_or_else(|| Error::Internal(format!("unknown media_type in row: {media_type_raw}")))?,
        title: row.try_get("title")?,
        added_at: row.try_get("added_at")?,
        is_active: row.try_get("is_active")?,
    })
}

#[derive(Clone)]
pub struct MediaRequestRepository {
    pool: PgPool,
}

impl MediaRequestRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_open(&self) -> Result<Vec<MediaRequest>> {
        let rows = sqlx::query("SELECT * FROM media_requests WHERE status IN ('pending', 'processing')")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_request).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<MediaRequest>> {
        let rows = sqlx::query("SELECT * FROM media_requests")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_request).collect()
    }

    pub async fn list_for(&self, tmdb_id: i64, media_type: MediaType) -> Result<Vec<MediaRequest>> {
        let rows = sqlx::query("SELECT * FROM media_requests WHERE tmdb_id = $1 AND media_type = $2")
            .bind(tmdb_id)
            .bind(media_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_request).collect()
    }

    /// Mark open requests for the title as available and stamp the time
    pub async fn mark_available_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        tmdb_id: i64,
        media_type: MediaType,
        available_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE media_requests
            SET status = 'available', available_at = $3
            WHERE tmdb_id = $1 AND media_type = $2 AND status IN ('pending', 'processing')
            ",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .bind(available_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_request(row: &PgRow) -> Result<MediaRequest> {
    let media_type_raw: String = row.try_get("media_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(MediaRequest {
        user_id: row.try_get("user_id")?,
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: MediaType::from_str(&media_type_raw)
            .ok_or_else(|| Error::Internal(format!("unknown media_type in row: {media_type_raw}")))?,
        title: row.try_get("title")?,
        status: RequestStatus::from_str(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown request status: {status_raw}")))?,
        requested_at: row.try_get("requested_at")?,
        available_at: row.try_get("available_at")?,
    })
}
