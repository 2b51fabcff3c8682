//! Plex media-server backend
//!
//! Talks to a Plex Media Server with an `X-Plex-Token`. All responses are
//! wrapped in a `MediaContainer`; metadata fields that vary by agent or
//! server version are decoded tolerantly and defaulted when absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::error::{ProviderError, Result};
use super::http::{check_response, join_url, shared_client};
use super::traits::{HistoryEvent, MediaServer, RemoteLibrary, RemoteUser};
use crate::models::{ExternalIds, LibraryItem, MediaType};

const PLEX_TOKEN_HEADER: &str = "X-Plex-Token";
/// Plex numeric metadata type for episodes
const PLEX_TYPE_EPISODE: u8 = 4;

pub struct PlexServer {
    base_url: String,
    token: String,
    client: Client,
}

impl PlexServer {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: shared_client(),
        }
    }

    async fn get_container<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = join_url(&self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(PLEX_TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;
        let response = check_response(response).await?;
        let wrapper: MediaContainerResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(wrapper.media_container)
    }

    /// Section listings default to the library's top-level type (movies or
    /// shows); a second query with `type=4` pulls the episode leaves, which
    /// is empty for movie libraries.
    async fn fetch_section(
        &self,
        library_id: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<LibraryItem>> {
        let path = format!("library/sections/{library_id}/all");

        let mut items = Vec::new();
        let top: MetadataContainer = self.get_container(&path, extra).await?;
        items.extend(
            top.metadata
                .into_iter()
                .filter_map(|m| self.item_from_metadata(m, Some(library_id))),
        );

        let mut episode_query: Vec<(&str, String)> = extra.to_vec();
        episode_query.push(("type", PLEX_TYPE_EPISODE.to_string()));
        let episodes: MetadataContainer = self.get_container(&path, &episode_query).await?;
        items.extend(
            episodes
                .metadata
                .into_iter()
                .filter_map(|m| self.item_from_metadata(m, Some(library_id))),
        );

        Ok(items)
    }

    fn item_from_metadata(&self, meta: PlexMetadata, library_id: Option<&str>) -> Option<LibraryItem> {
        let media_type = MediaType::from_str(&meta.kind)?;
        if meta.rating_key.is_empty() {
            return None;
        }
        let library_id = library_id
            .map(ToString::to_string)
            .or_else(|| meta.library_section_id.map(|id| id.to_string()))
            .unwrap_or_default();
        Some(LibraryItem {
            rating_key: meta.rating_key,
            title: meta.title,
            year: meta.year,
            media_type,
            library_id,
            added_at: meta.added_at.and_then(epoch_to_datetime),
            updated_at: meta.updated_at.and_then(epoch_to_datetime),
            view_count: meta.view_count.unwrap_or(0),
            last_viewed_at: meta.last_viewed_at.and_then(epoch_to_datetime),
            external_ids: parse_guids(&meta.guids),
            grandparent_rating_key: meta.grandparent_rating_key,
            season_number: meta.parent_index,
            episode_number: meta.index,
        })
    }
}

#[async_trait]
impl MediaServer for PlexServer {
    async fn list_libraries(&self) -> Result<Vec<RemoteLibrary>> {
        let container: DirectoryContainer = self.get_container("library/sections", &[]).await?;
        Ok(container
            .directories
            .into_iter()
            .filter_map(|d| {
                let media_type = MediaType::from_str(&d.kind)?;
                Some(RemoteLibrary {
                    id: d.key,
                    title: d.title,
                    media_type,
                })
            })
            .collect())
    }

    async fn list_library_contents(&self, library_id: &str) -> Result<Vec<LibraryItem>> {
        self.fetch_section(library_id, &[]).await
    }

    async fn list_recently_added(
        &self,
        library_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LibraryItem>> {
        self.fetch_section(library_id, &[("addedAt>", since.timestamp().to_string())])
            .await
    }

    async fn get_item(&self, rating_key: &str) -> Result<LibraryItem> {
        let container: MetadataContainer = self
            .get_container(&format!("library/metadata/{rating_key}"), &[])
            .await?;
        container
            .metadata
            .into_iter()
            .find_map(|m| self.item_from_metadata(m, None))
            .ok_or(ProviderError::NotFound)
    }

    async fn list_children(&self, rating_key: &str) -> Result<Vec<LibraryItem>> {
        let container: MetadataContainer = self
            .get_container(&format!("library/metadata/{rating_key}/children"), &[])
            .await?;
        Ok(container
            .metadata
            .into_iter()
            .filter_map(|m| self.item_from_metadata(m, None))
            .collect())
    }

    async fn list_watch_history(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>> {
        let container: MetadataContainer = self
            .get_container(
                "status/sessions/history/all",
                &[
                    ("viewedAt>", since.timestamp().to_string()),
                    ("X-Plex-Container-Size", limit.to_string()),
                    ("sort", "viewedAt:asc".to_string()),
                ],
            )
            .await?;
        let mut events = Vec::with_capacity(container.metadata.len());
        for meta in container.metadata {
            let Some(media_type) = MediaType::from_str(&meta.kind) else {
                debug!(kind = %meta.kind, "skipping history entry of unknown type");
                continue;
            };
            let Some(viewed_at) = meta.viewed_at.and_then(epoch_to_datetime) else {
                continue;
            };
            let Some(account_id) = meta.account_id else {
                continue;
            };
            events.push(HistoryEvent {
                account_id: account_id.to_string(),
                rating_key: meta.rating_key,
                media_type,
                viewed_at,
                show_rating_key: meta.grandparent_rating_key,
                show_title: meta.grandparent_title,
                season_number: meta.parent_index,
                episode_number: meta.index,
            });
        }
        Ok(events)
    }

    async fn delete_item(&self, rating_key: &str) -> Result<()> {
        let url = join_url(&self.base_url, &format!("library/metadata/{rating_key}"));
        let response = self
            .client
            .delete(&url)
            .header(PLEX_TOKEN_HEADER, &self.token)
            .send()
            .await?;
        match check_response(response).await {
            Ok(_) => Ok(()),
            // Already gone commutes with the delete
            Err(ProviderError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>> {
        let container: AccountContainer = self.get_container("accounts", &[]).await?;
        Ok(container
            .accounts
            .into_iter()
            .filter(|a| a.id != 0)
            .map(|a| RemoteUser {
                account_id: a.id.to_string(),
                name: a.name,
            })
            .collect())
    }
}

fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Parse Plex guid entries (`tmdb://603`, `tvdb://81189`, `imdb://tt0903747`)
/// into external ids. Unknown schemes are ignored.
fn parse_guids(guids: &[PlexGuid]) -> ExternalIds {
    let mut ids = ExternalIds::default();
    for guid in guids {
        let Some((scheme, value)) = guid.id.split_once("://") else {
            continue;
        };
        match scheme {
            "tmdb" => ids.tmdb = value.parse().ok().or(ids.tmdb),
            "tvdb" => ids.tvdb = value.parse().ok().or(ids.tvdb),
            "imdb" => {
                if ids.imdb.is_none() && !value.is_empty() {
                    ids.imdb = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    ids
}

#[derive(Debug, Deserialize)]
struct MediaContainerResponse<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<PlexDirectory>,
}

#[derive(Debug, Default, Deserialize)]
struct PlexDirectory {
    #[serde(default)]
    key: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    title: String,
    year: Option<i32>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "librarySectionID")]
    library_section_id: Option<i64>,
    #[serde(rename = "addedAt")]
    added_at: Option<i64>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<i64>,
    #[serde(rename = "viewCount")]
    view_count: Option<i64>,
    #[serde(rename = "lastViewedAt")]
    last_viewed_at: Option<i64>,
    #[serde(rename = "grandparentRatingKey")]
    grandparent_rating_key: Option<String>,
    #[serde(rename = "grandparentTitle")]
    grandparent_title: Option<String>,
    #[serde(rename = "parentIndex")]
    parent_index: Option<i32>,
    index: Option<i32>,
    #[serde(rename = "Guid")]
    guids: Vec<PlexGuid>,
    #[serde(rename = "accountID")]
    account_id: Option<i64>,
    #[serde(rename = "viewedAt")]
    viewed_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlexGuid {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct AccountContainer {
    #[serde(rename = "Account", default)]
    accounts: Vec<PlexAccount>,
}

#[derive(Debug, Default, Deserialize)]
struct PlexAccount {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_guid_schemes() {
        let guids = vec![
            PlexGuid {
                id: "tmdb://1396".to_string(),
            },
            PlexGuid {
                id: "tvdb://81189".to_string(),
            },
            PlexGuid {
                id: "imdb://tt0903747".to_string(),
            },
            PlexGuid {
                id: "plex://show/5d9c08254eefaa001f5d6dcb".to_string(),
            },
        ];
        let ids = parse_guids(&guids);
        assert_eq!(ids.tmdb, Some(1396));
        assert_eq!(ids.tvdb, Some(81189));
        assert_eq!(ids.imdb.as_deref(), Some("tt0903747"));
    }

    #[test]
    fn malformed_guids_are_ignored() {
        let guids = vec![
            PlexGuid {
                id: "tmdb://not-a-number".to_string(),
            },
            PlexGuid { id: String::new() },
        ];
        assert!(parse_guids(&guids).is_empty());
    }

    #[test]
    fn decodes_history_metadata() {
        let body = r#"{
            "MediaContainer": {
                "Metadata": [{
                    "ratingKey": "5501",
                    "type": "episode",
                    "accountID": 7,
                    "viewedAt": 1700000000,
                    "grandparentRatingKey": "100",
                    "grandparentTitle": "Severance",
                    "parentIndex": 2,
                    "index": 3
                }]
            }
        }"#;
        let parsed: MediaContainerResponse<MetadataContainer> =
            serde_json::from_str(body).expect("decode");
        let meta = &parsed.media_container.metadata[0];
        assert_eq!(meta.rating_key, "5501");
        assert_eq!(meta.account_id, Some(7));
        assert_eq!(meta.parent_index, Some(2));
        assert_eq!(meta.index, Some(3));
    }
}
