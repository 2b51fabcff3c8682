//! Unit of Work implementation
//!
//! Provides transactional scope for multi-repository operations. Every
//! mutating pass groups its writes through one of these so a failed write
//! rolls the whole pass back.

use sqlx::{PgPool, Postgres, Transaction};

use crate::Result;

/// Unit of Work for managing database transactions
pub struct UnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl UnitOfWork {
    /// Begin a new transaction
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self { tx: Some(tx) })
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Get the transaction for repository operations
    ///
    /// Returns an error if the transaction has already been consumed.
    pub fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| crate::Error::Internal("Transaction already consumed".to_string()))
    }

    /// Check if the transaction is still active (not consumed)
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}

/// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
pub async fn with_transaction<F, Fut, T>(pool: &PgPool, f: F) -> Result<T>
where
    F: FnOnce(Transaction<'static, Postgres>) -> Fut,
    Fut: std::future::Future<Output = Result<(Transaction<'static, Postgres>, T)>>,
{
    let tx = pool.begin().await?;
    match f(tx).await {
        Ok((tx, value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => Err(e),
    }
}
