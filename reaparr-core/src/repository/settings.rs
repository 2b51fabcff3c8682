//! Settings repository
//!
//! Key/value rows backing both the lifecycle knobs and the synchronizer's
//! cursors (ISO-8601 strings) and library cache snapshot (a JSON object).

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::Result;

#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All settings as a flat key/value map
    pub async fn get_all(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(map)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value").map_err(Into::into)).transpose()
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
        value: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
