//! Radarr (movie downloader) adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::error::{ProviderError, Result};
use super::http::{check_response, join_url, shared_client};
use super::traits::{MovieDownloader, RemoteMovie};

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct RadarrClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl RadarrClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: shared_client(),
        }
    }
}

#[async_trait]
impl MovieDownloader for RadarrClient {
    async fn list_movies(&self) -> Result<Vec<RemoteMovie>> {
        let url = join_url(&self.base_url, "api/v3/movie");
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let response = check_response(response).await?;
        let movies: Vec<RadarrMovie> = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(movies
            .into_iter()
            .map(|m| RemoteMovie {
                id: m.id,
                title: m.title,
                tmdb_id: (m.tmdb_id != 0).then_some(m.tmdb_id),
                has_file: m.has_file,
            })
            .collect())
    }

    async fn delete_movie(&self, movie_id: i64, delete_files: bool) -> Result<()> {
        let url = join_url(&self.base_url, &format!("api/v3/movie/{movie_id}"));
        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("deleteFiles", delete_files.to_string()),
                ("addImportExclusion", "false".to_string()),
            ])
            .send()
            .await?;
        match check_response(response).await {
            Ok(_) => Ok(()),
            // Movie already gone: the delete commutes
            Err(ProviderError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn search_movie(&self, movie_id: i64) -> Result<()> {
        let url = join_url(&self.base_url, "api/v3/command");
        let body = json!({
            "name": "MoviesSearch",
            "movieIds": [movie_id],
        });
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

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RadarrMovie {
    id: i64,
    title: String,
    tmdb_id: i64,
    has_file: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_movie_list() {
        let body = r#"[{"id": 5, "title": "Heat", "tmdbId": 949, "hasFile": true}]"#;
        let movies: Vec<RadarrMovie> = serde_json::from_str(body).expect("decode");
        assert_eq!(movies[0].tmdb_id, 949);
        assert!(movies[0].has_file);
    }
}
