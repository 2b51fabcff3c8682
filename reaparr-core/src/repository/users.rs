//! Media user repository

use sqlx::{PgPool, Row};

use crate::models::MediaUser;
use crate::Result;

#[derive(Clone)]
pub struct MediaUserRepository {
    pool: PgPool,
}

impl MediaUserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, account_id: &str, name: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO media_users (id, account_id, name, updated_at)
            VALUES ($1, $1, $2, NOW())
            ON CONFLICT (account_id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
            ",
        )
        .bind(account_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<MediaUser>> {
        let rows = sqlx::query("SELECT id, account_id, name, updated_at FROM media_users")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MediaUser {
                    id: row.try_get("id")?,
                    account_id: row.try_get("account_id")?,
                    name: row.try_get("name")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    pub async fn name_of(&self, user_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT name FROM media_users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("name").map_err(Into::into)).transpose()
    }
}
