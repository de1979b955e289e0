//! Outbound platform clients.
//!
//! This module provides:
//! - `SpotifyApi`: the token-bearing Spotify Web API calls the bot makes
//! - `DiscordApi`: the bot-token Discord REST calls the bot makes
//! - `reqwest` implementations of both (`SpotifyClient`, `DiscordClient`)
//!
//! Everything above this module depends on the traits only.

mod discord;
mod spotify;

pub use discord::{
    CommandDeclaration, DiscordClient, DiscordUser, Guild, GuildMember, RegisteredCommand,
    DISCORD_API_BASE,
};
pub use spotify::{
    Artist, CreatedPlaylist, PlayedTrack, SpotifyClient, SpotifyUser, Track, SPOTIFY_API_BASE,
};

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::warn;

use crate::{AuthToken, Error, Result};

/// Spotify serves at most this many recently played items per call.
pub const SPOTIFY_RECENTLY_PLAYED_LIMIT: u32 = 50;

/// Discord's maximum page size for guild member listing.
pub const GUILD_MEMBERS_PAGE_LIMIT: u32 = 1000;

#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Plays strictly after `after`, oldest to newest, at most `limit`.
    async fn recently_played(
        &self,
        token: &AuthToken,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<PlayedTrack>>;

    async fn top_tracks(&self, token: &AuthToken, limit: u32) -> Result<Vec<Track>>;

    async fn currently_playing(&self, token: &AuthToken) -> Result<Option<Track>>;

    async fn current_user(&self, token: &AuthToken) -> Result<SpotifyUser>;

    async fn create_playlist(
        &self,
        token: &AuthToken,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<CreatedPlaylist>;

    async fn add_tracks(&self, token: &AuthToken, playlist_id: &str, track_ids: &[String])
        -> Result<()>;
}

#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// The bot user; its id doubles as the application id.
    async fn current_user(&self) -> Result<DiscordUser>;

    /// One page of members with user ids greater than `after`.
    async fn list_guild_members(
        &self,
        guild_id: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<GuildMember>>;

    async fn get_guild(&self, guild_id: &str) -> Result<Guild>;

    /// Create or update a command, globally when `guild_id` is `None`.
    async fn upsert_command(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
        declaration: &CommandDeclaration,
    ) -> Result<RegisteredCommand>;

    async fn list_commands(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
    ) -> Result<Vec<RegisteredCommand>>;

    async fn delete_command(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
        command_id: &str,
    ) -> Result<()>;
}

/// Every member of a guild, following the `after` cursor until a short
/// page or `max_pages`. Hitting the page cap truncates the listing; that is
/// logged rather than hidden.
pub async fn all_guild_members(
    discord: &dyn DiscordApi,
    guild_id: &str,
    max_pages: usize,
) -> Result<Vec<GuildMember>> {
    let mut members: Vec<GuildMember> = Vec::new();
    let mut after: Option<String> = None;

    for page_no in 1..=max_pages.max(1) {
        let page = discord
            .list_guild_members(guild_id, after.as_deref(), GUILD_MEMBERS_PAGE_LIMIT)
            .await?;
        let full = page.len() as u32 >= GUILD_MEMBERS_PAGE_LIMIT;
        after = page.last().map(|m| m.user.id.clone());
        members.extend(page);

        if !full {
            return Ok(members);
        }
        if page_no == max_pages.max(1) {
            warn!(
                guild_id,
                members = members.len(),
                "guild member listing truncated at page cap"
            );
        }
    }

    Ok(members)
}

/// Retry limits for [`call_with_backoff`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_rate_limit_retries: u32,
    pub max_server_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a server-requested wait. Discord can ask for minutes
    /// on a global limit; a slash command cannot wait that long.
    pub max_retry_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 5,
            max_server_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

/// How long a 429 asks us to wait. Spotify sends whole seconds in
/// `Retry-After`; Discord sends fractional seconds in both `Retry-After`
/// and `X-RateLimit-Reset-After`, the latter being the more precise.
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    ["X-RateLimit-Reset-After", "Retry-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Send a request, retrying on 429 and on 5xx under the default policy.
pub async fn call_with_backoff<F>(platform: &str, builder_fn: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    call_with_policy(platform, &BackoffPolicy::default(), builder_fn).await
}

pub async fn call_with_policy<F>(
    platform: &str,
    policy: &BackoffPolicy,
    mut builder_fn: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut rate_limited = 0;
    let mut server_errors = 0;
    let mut delay = policy.initial_delay;

    loop {
        let response = builder_fn().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if rate_limited >= policy.max_rate_limit_retries {
                return Err(Error::upstream(anyhow!(
                    "{}: rate limited after {} retries",
                    platform,
                    rate_limited
                )));
            }

            let wait = retry_after(response.headers())
                .unwrap_or(delay)
                .min(policy.max_retry_after);
            let global = response
                .headers()
                .get("X-RateLimit-Global")
                .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"true"));
            warn!(platform, global, wait_ms = wait.as_millis() as u64, "rate limited");
            sleep(wait).await;

            rate_limited += 1;
            delay = (delay * 2).min(policy.max_delay);
            continue;
        }

        if status.is_server_error() && server_errors < policy.max_server_retries {
            warn!(platform, %status, "server error, retrying");
            sleep(delay).await;
            server_errors += 1;
            delay = (delay * 2).min(policy.max_delay);
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(Error::upstream(anyhow!("{}: HTTP {} - {}", platform, status, body)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubDiscord;

    #[tokio::test]
    async fn test_all_guild_members_follows_cursor() {
        let ids: Vec<String> = (0..2500).map(|i| format!("{:05}", i)).collect();
        let discord = StubDiscord::with_members(&ids.iter().map(String::as_str).collect::<Vec<_>>());

        let members = all_guild_members(&discord, "guild", 10).await.unwrap();
        assert_eq!(members.len(), 2500);
        assert_eq!(discord.member_page_calls(), 3);
        assert_eq!(members[1000].user.id, "01000");
    }

    #[tokio::test]
    async fn test_all_guild_members_stops_at_cap() {
        let ids: Vec<String> = (0..2500).map(|i| format!("{:05}", i)).collect();
        let discord = StubDiscord::with_members(&ids.iter().map(String::as_str).collect::<Vec<_>>());

        let members = all_guild_members(&discord, "guild", 1).await.unwrap();
        assert_eq!(members.len(), 1000);
        assert_eq!(discord.member_page_calls(), 1);
    }
    fn headers(pairs: &[(&'static str, &'static str)]) -> reqwest::header::HeaderMap {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, reqwest::header::HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_retry_after_prefers_discord_reset_header() {
        assert_eq!(
            retry_after(&headers(&[("Retry-After", "2")])),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            retry_after(&headers(&[("Retry-After", "1"), ("X-RateLimit-Reset-After", "0.25")])),
            Some(Duration::from_millis(250))
        );
        // An unparseable value falls through to the next header.
        assert_eq!(
            retry_after(&headers(&[("X-RateLimit-Reset-After", "soon"), ("Retry-After", "3")])),
            Some(Duration::from_secs(3))
        );
        assert_eq!(retry_after(&headers(&[])), None);
    }

    /// Serves `statuses` in order, then 200s, counting requests.
    async fn scripted_server(
        statuses: Vec<u16>,
    ) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use axum::http::StatusCode;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).copied().unwrap_or(200);
                async move {
                    (
                        StatusCode::from_u16(status).unwrap(),
                        [("Retry-After", "0.01")],
                        "body",
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/", addr), hits)
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..BackoffPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let (url, hits) = scripted_server(vec![429, 429]).await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let response = call_with_policy("spotify", &fast_policy(), || client.get(&url))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_server_errors_give_up_after_limit() {
        let (url, hits) = scripted_server(vec![502; 10]).await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let err = call_with_policy("discord", &fast_policy(), || client.get(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        assert!(err.to_string().contains("discord: HTTP 502"));
        // One attempt plus three retries.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = scripted_server(vec![401]).await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let err = call_with_policy("spotify", &fast_policy(), || client.get(&url))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 401"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
