use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Media server error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pass already running: {0}")]
    PassRunning(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // Map "no rows" to NotFound
            sqlx::Error::RowNotFound => Error::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => Error::AlreadyExists("Row already exists".to_string()),
                    // PostgreSQL foreign_key_violation
                    "23503" => Error::NotFound("Referenced row not found".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Error::InvalidInput("Required column is missing".to_string()),
                    _ => Error::Database(err),
                }
            }
            _ => Error::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
