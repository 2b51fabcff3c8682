//! Jellyfin media-server backend
//!
//! Same capability set as the Plex backend over Jellyfin's `/Items` API
//! with an `X-Emby-Token`. Jellyfin has no account-tagged global history
//! feed, so watch history is synthesized from each user's played items;
//! repeat views collapse into the latest play date.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::error::{ProviderError, Result};
use super::http::{check_response, join_url, shared_client};
use super::traits::{HistoryEvent, MediaServer, RemoteLibrary, RemoteUser};
use crate::models::{ExternalIds, LibraryItem, MediaType};

const EMBY_TOKEN_HEADER: &str = "X-Emby-Token";
const PAGE_SIZE: u32 = 1000;

pub struct JellyfinServer {
    base_url: String,
    token: String,
    client: Client,
    /// User context for item queries (played state is per-user)
    query_user: OnceCell<String>,
}

impl JellyfinServer {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: shared_client(),
            query_user: OnceCell::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = join_url(&self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(EMBY_TOKEN_HEADER, &self.token)
            .query(query)
            .send()
            .await?;
        let response = check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// First user on the server; Jellyfin item queries need a user context
    /// to carry play state.
    async fn query_user_id(&self) -> Result<&str> {
        self.query_user
            .get_or_try_init(|| async {
                let users: Vec<JellyfinUser> = self.get_json("Users", &[]).await?;
                users
                    .into_iter()
                    .next()
                    .map(|u| u.id)
                    .ok_or_else(|| ProviderError::InvalidConfig("no users on server".to_string()))
            })
            .await
            .map(String::as_str)
    }

    async fn query_items(
        &self,
        user_id: &str,
        mut query: Vec<(&'static str, String)>,
    ) -> Result<Vec<JellyfinItem>> {
        query.push((
            "Fields",
            "ProviderIds,DateCreated,ParentId,SeriesPrimaryImage".to_string(),
        ));
        query.push(("Recursive", "true".to_string()));
        query.push(("EnableUserData", "true".to_string()));

        let mut items = Vec::new();
        let mut start_index = 0u32;
        loop {
            let mut page_query = query.clone();
            page_query.push(("StartIndex", start_index.to_string()));
            page_query.push(("Limit", PAGE_SIZE.to_string()));
            let page: JellyfinItemsPage = self
                .get_json(&format!("Users/{user_id}/Items"), &page_query)
                .await?;
            let fetched = page.items.len() as u32;
            items.extend(page.items);
            start_index += fetched;
            if fetched < PAGE_SIZE || start_index >= page.total_record_count {
                break;
            }
        }
        Ok(items)
    }

    fn item_from_jellyfin(item: JellyfinItem, library_id: &str) -> Option<LibraryItem> {
        let media_type = MediaType::from_str(&item.kind)?;
        if item.id.is_empty() {
            return None;
        }
        let user_data = item.user_data.unwrap_or_default();
        Some(LibraryItem {
            rating_key: item.id,
            title: item.name,
            year: item.production_year,
            media_type,
            library_id: library_id.to_string(),
            added_at: item.date_created,
            updated_at: item.date_created,
            view_count: user_data.play_count,
            last_viewed_at: user_data.last_played_date,
            external_ids: ExternalIds {
                tmdb: item.provider_ids.tmdb.as_deref().and_then(|v| v.parse().ok()),
                tvdb: item.provider_ids.tvdb.as_deref().and_then(|v| v.parse().ok()),
                imdb: item.provider_ids.imdb.clone(),
            },
            grandparent_rating_key: item.series_id,
            season_number: item.parent_index_number,
            episode_number: item.index_number,
        })
    }
}

#[async_trait]
impl MediaServer for JellyfinServer {
    async fn list_libraries(&self) -> Result<Vec<RemoteLibrary>> {
        let response: JellyfinItemsPage = self.get_json("Library/MediaFolders", &[]).await?;
        Ok(response
            .items
            .into_iter()
            .filter_map(|folder| {
                let media_type = match folder.collection_type.as_deref() {
                    Some("movies") => MediaType::Movie,
                    Some("tvshows") => MediaType::Show,
                    _ => return None,
                };
                Some(RemoteLibrary {
                    id: folder.id,
                    title: folder.name,
                    media_type,
                })
            })
            .collect())
    }

    async fn list_library_contents(&self, library_id: &str) -> Result<Vec<LibraryItem>> {
        let user_id = self.query_user_id().await?.to_string();
        let items = self
            .query_items(
                &user_id,
                vec![
                    ("ParentId", library_id.to_string()),
                    ("IncludeItemTypes", "Movie,Series,Episode".to_string()),
                ],
            )
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| Self::item_from_jellyfin(item, library_id))
            .collect())
    }

    async fn list_recently_added(
        &self,
        library_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LibraryItem>> {
        let user_id = self.query_user_id().await?.to_string();
        let items = self
            .query_items(
                &user_id,
                vec![
                    ("ParentId", library_id.to_string()),
                    ("IncludeItemTypes", "Movie,Series,Episode".to_string()),
                    ("MinDateCreated", since.to_rfc3339()),
                ],
            )
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| Self::item_from_jellyfin(item, library_id))
            .collect())
    }

    async fn get_item(&self, rating_key: &str) -> Result<LibraryItem> {
        let user_id = self.query_user_id().await?.to_string();
        let item: JellyfinItem = self
            .get_json(&format!("Users/{user_id}/Items/{rating_key}"), &[])
            .await?;
        Self::item_from_jellyfin(item, "").ok_or(ProviderError::NotFound)
    }

    async fn list_children(&self, rating_key: &str) -> Result<Vec<LibraryItem>> {
        let user_id = self.query_user_id().await?.to_string();
        let items = self
            .query_items(&user_id, vec![("ParentId", rating_key.to_string())])
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| Self::item_from_jellyfin(item, ""))
            .collect())
    }

    async fn list_watch_history(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>> {
        let users: Vec<JellyfinUser> = self.get_json("Users", &[]).await?;
        let mut events = Vec::new();
        for user in users {
            let items = self
                .query_items(
                    &user.id,
                    vec![
                        ("IncludeItemTypes", "Movie,Episode".to_string()),
                        ("Filters", "IsPlayed".to_string()),
                    ],
                )
                .await?;
            for item in items {
                let Some(media_type) = MediaType::from_str(&item.kind) else {
                    continue;
                };
                let Some(played_at) = item.user_data.as_ref().and_then(|u| u.last_played_date)
                else {
                    continue;
                };
                if played_at < since {
                    continue;
                }
                events.push(HistoryEvent {
                    account_id: user.id.clone(),
                    rating_key: item.id,
                    media_type,
                    viewed_at: played_at,
                    show_rating_key: item.series_id,
                    show_title: item.series_name,
                    season_number: item.parent_index_number,
                    episode_number: item.index_number,
                });
            }
        }
        events.sort_by_key(|e| e.viewed_at);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn delete_item(&self, rating_key: &str) -> Result<()> {
        let url = join_url(&self.base_url, &format!("Items/{rating_key}"));
        let response = self
            .client
            .delete(&url)
            .header(EMBY_TOKEN_HEADER, &self.token)
            .send()
            .await?;
        match check_response(response).await {
            Ok(_) => Ok(()),
            Err(ProviderError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>> {
        let users: Vec<JellyfinUser> = self.get_json("Users", &[]).await?;
        Ok(users
            .into_iter()
            .map(|u| RemoteUser {
                account_id: u.id,
                name: u.name,
            })
            .collect())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JellyfinItemsPage {
    #[serde(rename = "Items")]
    items: Vec<JellyfinItem>,
    #[serde(rename = "TotalRecordCount")]
    total_record_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JellyfinItem {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "CollectionType")]
    collection_type: Option<String>,
    #[serde(rename = "ProductionYear")]
    production_year: Option<i32>,
    #[serde(rename = "DateCreated")]
    date_created: Option<DateTime<Utc>>,
    #[serde(rename = "SeriesId")]
    series_id: Option<String>,
    #[serde(rename = "SeriesName")]
    series_name: Option<String>,
    #[serde(rename = "ParentIndexNumber")]
    parent_index_number: Option<i32>,
    #[serde(rename = "IndexNumber")]
    index_number: Option<i32>,
    #[serde(rename = "ProviderIds")]
    provider_ids: JellyfinProviderIds,
    #[serde(rename = "UserData")]
    user_data: Option<JellyfinUserData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JellyfinProviderIds {
    #[serde(rename = "Tmdb")]
    tmdb: Option<String>,
    #[serde(rename = "Tvdb")]
    tvdb: Option<String>,
    #[serde(rename = "Imdb")]
    imdb: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JellyfinUserData {
    #[serde(rename = "PlayCount")]
    play_count: i64,
    #[serde(rename = "LastPlayedDate")]
    last_played_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JellyfinUser {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_episode_item() {
        let body = r#"{
            "Id": "abc123",
            "Name": "The We We Are",
            "Type": "Episode",
            "SeriesId": "show9",
            "SeriesName": "Severance",
            "ParentIndexNumber": 1,
            "IndexNumber": 9,
            "ProviderIds": {"Tvdb": "8110571"},
            "UserData": {"PlayCount": 2, "LastPlayedDate": "2024-02-01T20:15:00Z"}
        }"#;
        let item: JellyfinItem = serde_json::from_str(body).expect("decode");
        let mapped = JellyfinServer::item_from_jellyfin(item, "lib1").expect("map");
        assert_eq!(mapped.media_type, MediaType::Episode);
        assert_eq!(mapped.grandparent_rating_key.as_deref(), Some("show9"));
        assert_eq!(mapped.season_number, Some(1));
        assert_eq!(mapped.episode_number, Some(9));
        assert_eq!(mapped.view_count, 2);
        assert_eq!(mapped.external_ids.tvdb, Some(8_110_571));
    }

    #[test]
    fn unknown_item_types_are_skipped() {
        let item = JellyfinItem {
            id: "x".to_string(),
            kind: "BoxSet".to_string(),
            ..Default::default()
        };
        assert!(JellyfinServer::item_from_jellyfin(item, "lib1").is_none());
    }
}
