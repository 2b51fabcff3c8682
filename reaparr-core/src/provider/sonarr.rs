//! Sonarr (TV downloader) adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ProviderError, Result};
use super::http::{check_response, join_url, shared_client};
use super::traits::{RemoteSeries, RemoteSeriesEpisode, TvDownloader};

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct SonarrClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl SonarrClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: shared_client(),
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
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await?;
        let response = check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn post_command(&self, body: serde_json::Value) -> Result<()> {
        let url = join_url(&self.base_url, "api/v3/command");
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        check_response(response).await.map(|_| ())
    }
}

#[async_trait]
impl TvDownloader for SonarrClient {
    async fn list_series(&self) -> Result<Vec<RemoteSeries>> {
        let series: Vec<SonarrSeries> = self.get_json("api/v3/series", &[]).await?;
        Ok(series
            .into_iter()
            .map(|s| RemoteSeries {
                id: s.id,
                title: s.title,
                tvdb_id: (s.tvdb_id != 0).then_some(s.tvdb_id),
                tmdb_id: (s.tmdb_id != 0).then_some(s.tmdb_id),
                imdb_id: s.imdb_id.filter(|v| !v.is_empty()),
            })
            .collect())
    }

    async fn list_episodes(&self, series_id: i64) -> Result<Vec<RemoteSeriesEpisode>> {
        let episodes: Vec<SonarrEpisode> = self
            .get_json("api/v3/episode", &[("seriesId", series_id.to_string())])
            .await?;
        Ok(episodes
            .into_iter()
            .map(|e| RemoteSeriesEpisode {
                id: e.id,
                series_id: e.series_id,
                season_number: e.season_number,
                episode_number: e.episode_number,
                monitored: e.monitored,
                has_file: e.has_file,
                episode_file_id: (e.episode_file_id != 0).then_some(e.episode_file_id),
            })
            .collect())
    }

    async fn monitor_episodes(&self, episode_ids: &[i64], monitored: bool) -> Result<()> {
        if episode_ids.is_empty() {
            return Ok(());
        }
        let url = join_url(&self.base_url, "api/v3/episode/monitor");
        let body = MonitorRequest {
            episode_ids: episode_ids.to_vec(),
            monitored,
        };
        let response = self
            .client
            .put(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        check_response(response).await.map(|_| ())
    }

    async fn search_episodes(&self, episode_ids: &[i64]) -> Result<()> {
        if episode_ids.is_empty() {
            return Ok(());
        }
        self.post_command(json!({
            "name": "EpisodeSearch",
            "episodeIds": episode_ids,
        }))
        .await
    }

    async fn delete_episode_file(&self, episode_file_id: i64) -> Result<()> {
        let url = join_url(&self.base_url, &format!("api/v3/episodefile/{episode_file_id}"));
        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        match check_response(response).await {
            Ok(_) => Ok(()),
            // File already gone: the delete commutes
            Err(ProviderError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SonarrSeries {
    id: i64,
    title: String,
    tvdb_id: i64,
    tmdb_id: i64,
    imdb_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SonarrEpisode {
    id: i64,
    series_id: i64,
    season_number: i32,
    episode_number: i32,
    monitored: bool,
    has_file: bool,
    episode_file_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorRequest {
    episode_ids: Vec<i64>,
    monitored: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_episode_list() {
        let body = r#"[
            {"id": 11, "seriesId": 3, "seasonNumber": 4, "episodeNumber": 5,
             "monitored": false, "hasFile": true, "episodeFileId": 99},
            {"id": 12, "seriesId": 3, "seasonNumber": 4, "episodeNumber": 6,
             "monitored": true, "hasFile": false, "episodeFileId": 0}
        ]"#;
        let episodes: Vec<SonarrEpisode> = serde_json::from_str(body).expect("decode");
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].episode_file_id, 99);
        assert!(!episodes[1].has_file);
    }
}
