// Adapter error types

/// Errors surfaced by the media-server and downloader adapters
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Resource not found")]
    NotFound,

    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProviderError {
    /// Transient transport faults are retried on the next tick; everything
    /// else is reported and skipped.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Api { status: 500..=599, .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
