//! The bot's slash commands.

mod generate;
mod leaderboard;
mod now_playing;
mod register;

pub use generate::GenerateCommand;
pub use leaderboard::LeaderboardCommand;
pub use now_playing::NowPlayingCommand;
pub use register::RegisterCommand;

use std::sync::Arc;

use chorus_core::providers::{CommandDeclaration, DiscordApi, SpotifyApi};
use chorus_core::{
    Core, GuildPlaylistGenerator, LinkStore, LinkedAccount, ListenStore, OAuthFlow, TokenKeeper,
};

use crate::model::InteractionResponse;
use crate::router::CommandHandler;

pub const NOT_REGISTERED_MESSAGE: &str =
    "You need to use /register before you can use other commands";

/// Shared collaborators the commands are built from.
#[derive(Clone)]
pub struct Services {
    pub links: Arc<dyn LinkStore>,
    pub listens: Arc<dyn ListenStore>,
    pub spotify: Arc<dyn SpotifyApi>,
    pub discord: Arc<dyn DiscordApi>,
    pub oauth: Arc<dyn OAuthFlow>,
    pub tokens: Arc<TokenKeeper>,
    pub playlists: Arc<GuildPlaylistGenerator>,
    /// Member listing cap shared by every guild-wide command.
    pub max_member_pages: usize,
}

impl Services {
    pub fn from_core(core: &Core) -> Self {
        Self {
            links: core.store.clone(),
            listens: core.store.clone(),
            spotify: core.spotify.clone(),
            discord: core.discord.clone(),
            oauth: core.oauth.clone(),
            tokens: core.tokens.clone(),
            playlists: Arc::new(core.playlists()),
            max_member_pages: core.config.playlist.max_member_pages,
        }
    }
}

/// Every built-in command, in declaration order.
pub fn builtin(services: &Services) -> Vec<Box<dyn CommandHandler>> {
    vec![
        Box::new(RegisterCommand::new(services.oauth.clone())),
        Box::new(NowPlayingCommand::new(
            services.links.clone(),
            services.listens.clone(),
            services.spotify.clone(),
            services.tokens.clone(),
        )),
        Box::new(LeaderboardCommand::new(
            services.discord.clone(),
            services.listens.clone(),
            services.max_member_pages,
        )),
        Box::new(GenerateCommand::new(
            services.links.clone(),
            services.playlists.clone(),
        )),
    ]
}

pub(crate) fn declaration(name: &str, description: &str) -> CommandDeclaration {
    CommandDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        default_permission: true,
    }
}

/// The invoker's link, or the reply telling them to register first.
pub(crate) async fn require_link(
    links: &dyn LinkStore,
    account_id: &str,
) -> chorus_core::Result<Result<LinkedAccount, InteractionResponse>> {
    let link = links
        .get_link(account_id)
        .await
        .map_err(chorus_core::Error::persistence)?;
    Ok(link.ok_or_else(|| InteractionResponse::ephemeral(NOT_REGISTERED_MESSAGE)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::Interaction;
    use crate::router::CommandContext;
    use chorus_core::testing::{StubDiscord, StubLinks, StubListens, StubOAuth, StubSpotify};
    use chorus_core::PlaylistConfig;
    use tokio_util::sync::CancellationToken;

    /// Collaborators kept with their concrete stub types so tests can seed them.
    pub(crate) struct Stubs {
        pub links: Arc<StubLinks>,
        pub listens: Arc<StubListens>,
        pub spotify: Arc<StubSpotify>,
        pub discord: Arc<StubDiscord>,
        pub oauth: Arc<StubOAuth>,
    }

    impl Stubs {
        pub(crate) fn new(discord: StubDiscord) -> Self {
            Self {
                links: Arc::new(StubLinks::default()),
                listens: Arc::new(StubListens::default()),
                spotify: Arc::new(StubSpotify::default()),
                discord: Arc::new(discord),
                oauth: Arc::new(StubOAuth::default()),
            }
        }

        pub(crate) fn services(&self) -> Services {
            let tokens = Arc::new(TokenKeeper::new(self.links.clone(), self.oauth.clone()));
            let config = PlaylistConfig::default();
            let max_member_pages = config.max_member_pages;
            let playlists = Arc::new(GuildPlaylistGenerator::new(
                self.discord.clone(),
                self.spotify.clone(),
                self.links.clone(),
                tokens.clone(),
                config,
            ));
            Services {
                links: self.links.clone(),
                listens: self.listens.clone(),
                spotify: self.spotify.clone(),
                discord: self.discord.clone(),
                oauth: self.oauth.clone(),
                tokens,
                playlists,
                max_member_pages,
            }
        }
    }

    /// A guild invocation of `name` by user `user_id`.
    pub(crate) fn invocation(name: &str, user_id: &str) -> CommandContext {
        let interaction: Interaction = serde_json::from_value(serde_json::json!({
            "type": 2,
            "guild_id": "guild-1",
            "member": {"user": {"id": user_id, "username": format!("user-{}", user_id)}},
            "data": {"name": name}
        }))
        .unwrap();
        CommandContext {
            data: serde_json::from_value(serde_json::json!({"name": name})).unwrap(),
            interaction,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_builtin_names_are_unique_and_ordered() {
        let stubs = Stubs::new(StubDiscord::default());
        let names: Vec<String> = builtin(&stubs.services())
            .iter()
            .map(|h| h.declaration().name)
            .collect();
        assert_eq!(names, vec!["register", "np", "leaderboard", "generate"]);
    }
}
