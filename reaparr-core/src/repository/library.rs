//! Library item repository (the materialized library cache)

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{ExternalIds, LibraryItem, MediaType};
use crate::{Error, Result};

#[derive(Clone)]
pub struct LibraryItemRepository {
    pool: PgPool,
}

impl LibraryItemRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        item: &LibraryItem,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO library_items
                (rating_key, title, year, media_type, library_id, added_at, updated_at,
                 view_count, last_viewed_at, tmdb_id, tvdb_id, imdb_id,
                 grandparent_rating_key, season_number, episode_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (rating_key) DO UPDATE SET
                title = EXCLUDED.title,
                year = EXCLUDED.year,
                media_type = EXCLUDED.media_type,
                library_id = EXCLUDED.library_id,
                added_at = COALESCE(EXCLUDED.added_at, library_items.added_at),
                updated_at = EXCLUDED.updated_at,
                view_count = EXCLUDED.view_count,
                last_viewed_at = COALESCE(EXCLUDED.last_viewed_at, library_items.last_viewed_at),
                tmdb_id = COALESCE(EXCLUDED.tmdb_id, library_items.tmdb_id),
                tvdb_id = COALESCE(EXCLUDED.tvdb_id, library_items.tvdb_id),
                imdb_id = COALESCE(EXCLUDED.imdb_id, library_items.imdb_id),
                grandparent_rating_key =
                    COALESCE(EXCLUDED.grandparent_rating_key, library_items.grandparent_rating_key),
                season_number = COALESCE(EXCLUDED.season_number, library_items.season_number),
                episode_number = COALESCE(EXCLUDED.episode_number, library_items.episode_number)
            ",
        )
        .bind(&item.rating_key)
        .bind(&item.title)
        .bind(item.year)
        .bind(item.media_type.as_str())
        .bind(&item.library_id)
        .bind(item.added_at)
        .bind(item.updated_at)
        .bind(item.view_count)
        .bind(item.last_viewed_at)
        .bind(item.external_ids.tmdb)
        .bind(item.external_ids.tvdb)
        .bind(item.external_ids.imdb.as_deref())
        .bind(item.grandparent_rating_key.as_deref())
        .bind(item.season_number)
        .bind(item.episode_number)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        rating_key: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM library_items WHERE rating_key = $1")
            .bind(rating_key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get(&self, rating_key: &str) -> Result<Option<LibraryItem>> {
        let row = sqlx::query("SELECT * FROM library_items WHERE rating_key = $1")
            .bind(rating_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_item(&r)).transpose()
    }

    pub async fn list_by_type(&self, media_type: MediaType) -> Result<Vec<LibraryItem>> {
        let rows = sqlx::query("SELECT * FROM library_items WHERE media_type = $1 ORDER BY title")
            .bind(media_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    /// Episodes of one show, ordered by season then episode
    pub async fn list_show_episodes(&self, show_rating_key: &str) -> Result<Vec<LibraryItem>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM library_items
            WHERE media_type = 'episode' AND grandparent_rating_key = $1
            ORDER BY season_number, episode_number
            ",
        )
        .bind(show_rating_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_item).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<LibraryItem>> {
        let rows = sqlx::query("SELECT * FROM library_items")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }
}

fn row_to_item(row: &PgRow) -> Result<LibraryItem> {
    let media_type_raw: String = row.try_get("media_type")?;
    let media_type = MediaType::from_str(&media_type_raw)
        .ok_or_else(|| Error::Internal(format!("unknown media_type in row: {media_type_raw}")))?;
    Ok(LibraryItem {
        rating_key: row.try_get("rating_key")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        media_type,
        library_id: row.try_get("library_id")?,
        added_at: row.try_get("added_at")?,
        updated_at: row.try_get("updated_at")?,
        view_count: row.try_get("view_count")?,
        last_viewed_at: row.try_get("last_viewed_at")?,
        external_ids: ExternalIds {
            tmdb: row.try_get("tmdb_id")?,
            tvdb: row.try_get("tvdb_id")?,
            imdb: row.try_get("imdb_id")?,
        },
        grandparent_rating_key: row.try_get("grandparent_rating_key")?,
        season_number: row.try_get("season_number")?,
        episode_number: row.try_get("episode_number")?,
    })
}
