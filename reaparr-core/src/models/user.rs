use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A viewer imported from the media server. `account_id` is the opaque id
/// the server tags watch-history events with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUser {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}
