//! Spotify Web API client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{call_with_backoff, SpotifyApi};
use crate::{AuthToken, Result};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Absent for local files, which Spotify plays but cannot reference.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub is_local: bool,
}

impl Track {
    /// "Name by Artist, Artist".
    pub fn display(&self) -> String {
        if self.artists.is_empty() {
            return self.name.clone();
        }
        let artists: Vec<&str> = self.artists.iter().map(|a| a.name.as_str()).collect();
        format!("{} by {}", self.name, artists.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
}

/// One entry of the recently-played history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedTrack {
    pub track: Track,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
    #[serde(default)]
    pub external_urls: HashMap<String, String>,
}

impl CreatedPlaylist {
    pub fn spotify_url(&self) -> Option<&str> {
        self.external_urls.get("spotify").map(String::as_str)
    }
}

#[derive(Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct CurrentlyPlaying {
    item: Option<Track>,
}

/// `reqwest` implementation of [`SpotifyApi`].
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SpotifyClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self::with_base_url(http_client, SPOTIFY_API_BASE)
    }

    pub fn with_base_url(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    #[instrument(skip(self, token))]
    async fn recently_played(
        &self,
        token: &AuthToken,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<PlayedTrack>> {
        let url = self.url("/me/player/recently-played");
        let after_ms = after.timestamp_millis().to_string();
        let limit = limit.to_string();

        let response = call_with_backoff("spotify", || {
            self.http_client
                .get(&url)
                .bearer_auth(&token.access_token)
                .query(&[("after", after_ms.as_str()), ("limit", limit.as_str())])
        })
        .await?;

        let page: Paging<PlayedTrack> = response.json().await?;
        let mut items = page.items;
        // The endpoint answers newest first.
        items.sort_by_key(|p| p.played_at);
        debug!(items = items.len(), "fetched recently played");
        Ok(items)
    }

    #[instrument(skip(self, token))]
    async fn top_tracks(&self, token: &AuthToken, limit: u32) -> Result<Vec<Track>> {
        let url = self.url("/me/top/tracks");
        let limit = limit.to_string();

        let response = call_with_backoff("spotify", || {
            self.http_client
                .get(&url)
                .bearer_auth(&token.access_token)
                .query(&[("limit", limit.as_str())])
        })
        .await?;

        let page: Paging<Track> = response.json().await?;
        Ok(page.items)
    }

    #[instrument(skip(self, token))]
    async fn currently_playing(&self, token: &AuthToken) -> Result<Option<Track>> {
        let url = self.url("/me/player/currently-playing");

        let response = call_with_backoff("spotify", || {
            self.http_client.get(&url).bearer_auth(&token.access_token)
        })
        .await?;

        // 204 means nothing is playing.
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let playing: CurrentlyPlaying = response.json().await?;
        Ok(playing.item)
    }

    #[instrument(skip(self, token))]
    async fn current_user(&self, token: &AuthToken) -> Result<SpotifyUser> {
        let url = self.url("/me");

        let response = call_with_backoff("spotify", || {
            self.http_client.get(&url).bearer_auth(&token.access_token)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self, token, description))]
    async fn create_playlist(
        &self,
        token: &AuthToken,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<CreatedPlaylist> {
        let url = self.url(&format!("/users/{}/playlists", user_id));
        let body = json!({
            "name": name,
            "description": description,
            "public": public,
        });

        let response = call_with_backoff("spotify", || {
            self.http_client
                .post(&url)
                .bearer_auth(&token.access_token)
                .json(&body)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self, token, track_ids), fields(tracks = track_ids.len()))]
    async fn add_tracks(
        &self,
        token: &AuthToken,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        let url = self.url(&format!("/playlists/{}/tracks", playlist_id));
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| format!("spotify:track:{}", id))
            .collect();
        let body = json!({ "uris": uris });

        call_with_backoff("spotify", || {
            self.http_client
                .post(&url)
                .bearer_auth(&token.access_token)
                .json(&body)
        })
        .await?;

        Ok(())
    }
}
