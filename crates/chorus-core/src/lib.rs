//! Chorus Core - the bot's workflows.
//!
//! - [`scraper::HistoryScraper`]: background incremental import of each
//!   linked account's Spotify listening history
//! - [`playlist::GuildPlaylistGenerator`]: one shared playlist built from
//!   every registered guild member's top tracks
//! - [`tokens::TokenKeeper`]: per-account token refresh
//!
//! Platform access goes through the [`providers::SpotifyApi`] and
//! [`providers::DiscordApi`] traits.

pub mod config;
pub mod error;
pub mod playlist;
pub mod providers;
pub mod scraper;
pub mod tokens;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use chorus_auth_bridge::{AuthBridge, OAuthConfig, OAuthFlow};
pub use chorus_store::{
    AuthToken, LinkStore, LinkedAccount, ListenEntry, ListenStore, SqliteStore,
};
pub use config::{AppConfig, FailurePolicy, PlaylistConfig, ScraperConfig};
pub use error::{Error, Result};
pub use playlist::{GuildPlaylistGenerator, PlaylistRequest};
pub use scraper::{AccountFailure, AccountReport, HistoryScraper, PassReport};
pub use tokens::TokenKeeper;

use providers::{DiscordApi, DiscordClient, SpotifyApi, SpotifyClient};

/// The wired-up bot: store, platform clients and token keeper.
#[derive(Clone)]
pub struct Core {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub spotify: Arc<dyn SpotifyApi>,
    pub discord: Arc<dyn DiscordApi>,
    pub oauth: Arc<dyn OAuthFlow>,
    pub tokens: Arc<TokenKeeper>,
}

impl Core {
    pub async fn init(config: AppConfig) -> Result<Self> {
        info!("Initializing Chorus Core...");
        let store = Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .map_err(Error::persistence)?,
        );

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("chorus/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let spotify: Arc<dyn SpotifyApi> = Arc::new(SpotifyClient::new(http_client.clone()));
        let discord: Arc<dyn DiscordApi> =
            Arc::new(DiscordClient::new(http_client, &config.discord_bot_token));
        let oauth: Arc<dyn OAuthFlow> = Arc::new(AuthBridge::new(OAuthConfig::spotify(
            &config.spotify_client_id,
            &config.spotify_client_secret,
            &config.redirect_uri(),
        )));
        let tokens = Arc::new(TokenKeeper::new(store.clone(), oauth.clone()));

        Ok(Self {
            config,
            store,
            spotify,
            discord,
            oauth,
            tokens,
        })
    }

    pub fn scraper(&self) -> HistoryScraper {
        HistoryScraper::new(
            self.store.clone(),
            self.store.clone(),
            self.spotify.clone(),
            self.tokens.clone(),
            self.config.scraper.clone(),
        )
    }

    pub fn playlists(&self) -> GuildPlaylistGenerator {
        GuildPlaylistGenerator::new(
            self.discord.clone(),
            self.spotify.clone(),
            self.store.clone(),
            self.tokens.clone(),
            self.config.playlist.clone(),
        )
    }
}

/// Await `fut` unless `cancel` fires first, in which case the future is
/// dropped and `Error::Cancelled` returned.
pub async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
