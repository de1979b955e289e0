//! Guild playlist generation.
//!
//! Collects the top tracks of every guild member who has linked Spotify,
//! merges them and publishes the result as one public playlist owned by the
//! member who asked for it.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::config::PlaylistConfig;
use crate::providers::{all_guild_members, CreatedPlaylist, DiscordApi, SpotifyApi, Track};
use crate::{until_cancelled, Error, LinkStore, LinkedAccount, Result, TokenKeeper};

pub const TOP_TRACKS_PER_MEMBER: u32 = 5;

/// Spotify accepts at most this many tracks in one add call.
pub const MAX_PLAYLIST_TRACKS: usize = 100;

#[derive(Debug, Clone)]
pub struct PlaylistRequest {
    pub guild_id: String,
    /// Shown in the playlist description.
    pub initiator_name: String,
    /// The playlist is created in this account.
    pub initiator: LinkedAccount,
}

/// Keep the first occurrence of each track id, preserving order. Tracks
/// without an id (local files) cannot be added to a playlist and are dropped.
pub fn dedupe_tracks(tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|t| t.id.as_ref().is_some_and(|id| seen.insert(id.clone())))
        .collect()
}

pub fn playlist_name(guild_name: &str) -> String {
    format!("Guild Playlist - {}", guild_name)
}

pub struct GuildPlaylistGenerator {
    discord: Arc<dyn DiscordApi>,
    spotify: Arc<dyn SpotifyApi>,
    links: Arc<dyn LinkStore>,
    tokens: Arc<TokenKeeper>,
    config: PlaylistConfig,
}

impl GuildPlaylistGenerator {
    pub fn new(
        discord: Arc<dyn DiscordApi>,
        spotify: Arc<dyn SpotifyApi>,
        links: Arc<dyn LinkStore>,
        tokens: Arc<TokenKeeper>,
        config: PlaylistConfig,
    ) -> Self {
        Self {
            discord,
            spotify,
            links,
            tokens,
            config,
        }
    }

    /// Build and publish the playlist; returns its Spotify link.
    ///
    /// Members without a link, or whose top tracks cannot be fetched, are
    /// skipped. Store failures and every step after the merge are fatal.
    #[instrument(skip(self, request, cancel), fields(guild_id = %request.guild_id))]
    pub async fn execute(&self, request: &PlaylistRequest, cancel: &CancellationToken) -> Result<String> {
        let members = until_cancelled(
            cancel,
            all_guild_members(
                self.discord.as_ref(),
                &request.guild_id,
                self.config.max_member_pages,
            ),
        )
        .await?;

        let mut collected: Vec<Track> = Vec::new();
        let mut contributors = 0usize;

        for member in &members {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some(link) = self
                .links
                .get_link(&member.user.id)
                .await
                .map_err(Error::persistence)?
            else {
                debug!(account_id = %member.user.id, "member not registered, skipping");
                continue;
            };

            match self.member_top_tracks(&link).await {
                Ok(tracks) => {
                    contributors += 1;
                    collected.extend(tracks);
                }
                Err(e) => {
                    warn!(account_id = %link.account_id, error = %e, "skipping member: top tracks unavailable");
                }
            }
        }

        let tracks = dedupe_tracks(collected);
        if tracks.len() > self.config.max_tracks {
            return Err(Error::LimitExceeded {
                what: "playlist tracks",
                limit: self.config.max_tracks,
                actual: tracks.len(),
            });
        }

        // Creation and track upload either both start or neither does.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Detached so that dropping the request future cannot leave a
        // created playlist without its tracks.
        let track_ids: Vec<String> = tracks.into_iter().filter_map(|t| t.id).collect();
        let track_count = track_ids.len();
        let publish = tokio::spawn(
            publish_playlist(
                self.discord.clone(),
                self.spotify.clone(),
                self.tokens.clone(),
                request.clone(),
                track_ids,
            )
            .instrument(Span::current()),
        );
        let playlist = publish
            .await
            .map_err(|e| Error::upstream(anyhow!("playlist publish task failed: {}", e)))??;

        let link = playlist
            .spotify_url()
            .map(str::to_string)
            .ok_or(Error::MissingArtifactLink)?;

        info!(
            members = members.len(),
            contributors,
            tracks = track_count,
            playlist_id = %playlist.id,
            "guild playlist created"
        );
        Ok(link)
    }

    async fn member_top_tracks(&self, link: &LinkedAccount) -> Result<Vec<Track>> {
        let token = self.tokens.fresh_token(link).await?;
        self.spotify
            .top_tracks(&token, self.config.tracks_per_member)
            .await
    }
}

/// Create the playlist in the initiator's account and fill it.
async fn publish_playlist(
    discord: Arc<dyn DiscordApi>,
    spotify: Arc<dyn SpotifyApi>,
    tokens: Arc<TokenKeeper>,
    request: PlaylistRequest,
    track_ids: Vec<String>,
) -> Result<CreatedPlaylist> {
    let guild = discord.get_guild(&request.guild_id).await?;
    let token = tokens.fresh_token(&request.initiator).await?;
    let owner = spotify.current_user(&token).await?;

    let description = format!(
        "Guild playlist generated at {} by {}",
        Utc::now().format("%Y-%m-%d %H:%M UTC"),
        request.initiator_name
    );
    let playlist = spotify
        .create_playlist(&token, &owner.id, &playlist_name(&guild.name), &description, true)
        .await?;

    // Spotify rejects an add call with no URIs.
    if !track_ids.is_empty() {
        spotify.add_tracks(&token, &playlist.id, &track_ids).await?;
    }
    Ok(playlist)
}
