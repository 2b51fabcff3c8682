//! Protection exclusion repository

use sqlx::{PgPool, Row};

use crate::models::{ExclusionKind, MediaType, ProtectionExclusion};
use crate::{Error, Result};

#[derive(Clone)]
pub struct ProtectionRepository {
    pool: PgPool,
}

impl ProtectionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, tmdb_id: i64, media_type: MediaType) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM protection_exclusions WHERE tmdb_id = $1 AND media_type = $2",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    pub async fn list(&self) -> Result<Vec<ProtectionExclusion>> {
        let rows = sqlx::query("SELECT * FROM protection_exclusions")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let media_type_raw: String = row.try_get("media_type")?;
                let kind_raw: String = row.try_get("kind")?;
                Ok(ProtectionExclusion {
                    tmdb_id: row.try_get("tmdb_id")?,
                    media_type: MediaType::from_str(&media_type_raw).ok_or_else(|| {
                        Error::Internal(format!("unknown media_type in row: {media_type_raw}"))
                    })?,
                    kind: ExclusionKind::from_str(&kind_raw)
                        .ok_or_else(|| Error::Internal(format!("unknown exclusion kind: {kind_raw}")))?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn add(&self, tmdb_id: i64, media_type: MediaType, kind: ExclusionKind) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO protection_exclusions (tmdb_id, media_type, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (tmdb_id, media_type, kind) DO NOTHING
            ",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, tmdb_id: i64, media_type: MediaType, kind: ExclusionKind) -> Result<()> {
        sqlx::query(
            "DELETE FROM protection_exclusions WHERE tmdb_id = $1 AND media_type = $2 AND kind = $3",
        )
        .bind(tmdb_id)
        .bind(media_type.as_str())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
