use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::providers::CommandDeclaration;
use chorus_core::{Error, GuildPlaylistGenerator, LinkStore, PlaylistRequest};
use tracing::warn;

use super::{declaration, require_link};
use crate::model::InteractionResponse;
use crate::router::{CommandContext, CommandHandler};

/// `/generate`: builds the guild playlist in the invoker's Spotify account.
pub struct GenerateCommand {
    links: Arc<dyn LinkStore>,
    playlists: Arc<GuildPlaylistGenerator>,
}

impl GenerateCommand {
    pub fn new(links: Arc<dyn LinkStore>, playlists: Arc<GuildPlaylistGenerator>) -> Self {
        Self { links, playlists }
    }
}

#[async_trait]
impl CommandHandler for GenerateCommand {
    fn declaration(&self) -> CommandDeclaration {
        declaration("generate", "Generates a playlist for your current server")
    }

    async fn handle(&self, ctx: &CommandContext) -> chorus_core::Result<Option<InteractionResponse>> {
        let account_id = ctx.invoker_id()?;
        let initiator = match require_link(self.links.as_ref(), account_id).await? {
            Ok(link) => link,
            Err(reply) => return Ok(Some(reply)),
        };
        let Some(guild_id) = ctx.interaction.guild_id.clone() else {
            return Ok(Some(InteractionResponse::ephemeral(
                "This command only works inside a server.",
            )));
        };

        let request = PlaylistRequest {
            guild_id,
            initiator_name: ctx
                .interaction
                .invoker_name()
                .unwrap_or(account_id)
                .to_string(),
            initiator,
        };

        match self.playlists.execute(&request, &ctx.cancel).await {
            Ok(url) => Ok(Some(InteractionResponse::message(format!(
                "You can find your new playlist here: {}",
                url
            )))),
            Err(Error::LimitExceeded { limit, actual, .. }) => {
                warn!(limit, actual, "guild playlist over the track limit");
                Ok(Some(InteractionResponse::message(format!(
                    "This server's top tracks add up to {} songs, but a playlist can only take {} at once.",
                    actual, limit
                ))))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{invocation, Stubs};
    use crate::commands::NOT_REGISTERED_MESSAGE;
    use chorus_core::testing::{account, track, StubDiscord};
    use chorus_core::PlaylistConfig;

    #[tokio::test]
    async fn test_unregistered_user_is_told_to_register() {
        let stubs = Stubs::new(StubDiscord::with_members(&["A"]));
        let services = stubs.services();
        let command = GenerateCommand::new(services.links, services.playlists);

        let reply = command
            .handle(&invocation("generate", "A"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content(), Some(NOT_REGISTERED_MESSAGE));
        assert!(stubs.spotify.created().is_empty());
    }

    #[tokio::test]
    async fn test_replies_with_playlist_link() {
        let stubs = Stubs::new(StubDiscord::with_members(&["A"]));
        stubs.links.upsert_link(&account("A", "tok-A")).await.unwrap();
        stubs.spotify.set_top_tracks("tok-A", vec![track("t1"), track("t2")]);
        let services = stubs.services();
        let command = GenerateCommand::new(services.links, services.playlists);

        let reply = command
            .handle(&invocation("generate", "A"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.content(),
            Some("You can find your new playlist here: https://open.spotify.com/playlist/playlist-1")
        );
        assert!(stubs.spotify.created()[0].description.ends_with("by user-A"));
    }

    #[tokio::test]
    async fn test_limit_is_reported_to_the_user() {
        let stubs = Stubs::new(StubDiscord::with_members(&["A"]));
        stubs.links.upsert_link(&account("A", "tok-A")).await.unwrap();
        stubs.spotify.set_top_tracks("tok-A", vec![track("t1"), track("t2"), track("t3")]);
        let services = stubs.services();
        let playlists = Arc::new(GuildPlaylistGenerator::new(
            services.discord.clone(),
            services.spotify.clone(),
            services.links.clone(),
            services.tokens.clone(),
            PlaylistConfig {
                max_tracks: 2,
                ..PlaylistConfig::default()
            },
        ));
        let command = GenerateCommand::new(services.links, playlists);

        let reply = command
            .handle(&invocation("generate", "A"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.content().unwrap().contains("3 songs"));
        assert!(stubs.spotify.created().is_empty());
    }
}
