use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::providers::{CommandDeclaration, SpotifyApi};
use chorus_core::{Error, LinkStore, ListenStore, TokenKeeper};

use super::{declaration, require_link};
use crate::model::InteractionResponse;
use crate::router::{CommandContext, CommandHandler};

/// `/np`: the invoker's current track with how often they've played it.
pub struct NowPlayingCommand {
    links: Arc<dyn LinkStore>,
    listens: Arc<dyn ListenStore>,
    spotify: Arc<dyn SpotifyApi>,
    tokens: Arc<TokenKeeper>,
}

impl NowPlayingCommand {
    pub fn new(
        links: Arc<dyn LinkStore>,
        listens: Arc<dyn ListenStore>,
        spotify: Arc<dyn SpotifyApi>,
        tokens: Arc<TokenKeeper>,
    ) -> Self {
        Self {
            links,
            listens,
            spotify,
            tokens,
        }
    }
}

#[async_trait]
impl CommandHandler for NowPlayingCommand {
    fn declaration(&self) -> CommandDeclaration {
        declaration("np", "Shows your currently playing track")
    }

    async fn handle(&self, ctx: &CommandContext) -> chorus_core::Result<Option<InteractionResponse>> {
        let account_id = ctx.invoker_id()?;
        let link = match require_link(self.links.as_ref(), account_id).await? {
            Ok(link) => link,
            Err(reply) => return Ok(Some(reply)),
        };

        let token = ctx.guard(self.tokens.fresh_token(&link)).await?;
        let Some(track) = ctx.guard(self.spotify.currently_playing(&token)).await? else {
            return Ok(Some(InteractionResponse::message(
                "You aren't listening to anything right now.",
            )));
        };

        // Local files are never stored, so there is nothing to count.
        let track_listens = match track.id.as_deref() {
            Some(track_id) => self
                .listens
                .track_listen_count(account_id, track_id)
                .await
                .map_err(Error::persistence)?,
            None => 0,
        };
        let total_listens = self
            .listens
            .account_listen_count(account_id)
            .await
            .map_err(Error::persistence)?;

        let artist = track
            .artists
            .first()
            .map(|a| a.name.as_str())
            .unwrap_or("unknown");

        Ok(Some(InteractionResponse::message(format!(
            "You are listening to {} - {}. You've listened to this track {} times before, and {} tracks in total.",
            track.name, artist, track_listens, total_listens
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{invocation, Stubs};
    use crate::commands::NOT_REGISTERED_MESSAGE;
    use chorus_core::providers::{Artist, Track};
    use chorus_core::testing::{account, local_track, StubDiscord};
    use chorus_core::ListenEntry;
    use chrono::{TimeZone, Utc};

    fn command(stubs: &Stubs) -> NowPlayingCommand {
        let services = stubs.services();
        NowPlayingCommand::new(
            services.links,
            services.listens,
            services.spotify,
            services.tokens,
        )
    }

    #[tokio::test]
    async fn test_unregistered_user_is_told_to_register() {
        let stubs = Stubs::new(StubDiscord::default());
        let reply = command(&stubs)
            .handle(&invocation("np", "42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content(), Some(NOT_REGISTERED_MESSAGE));
    }

    #[tokio::test]
    async fn test_reports_counts_for_current_track() {
        let stubs = Stubs::new(StubDiscord::default());
        stubs.links.upsert_link(&account("42", "tok-42")).await.unwrap();
        stubs.spotify.set_playing(
            "tok-42",
            Track {
                id: Some("t1".to_string()),
                name: "Heat Waves".to_string(),
                artists: vec![Artist {
                    name: "Glass Animals".to_string(),
                }],
                is_local: false,
            },
        );
        let at = |s| Utc.with_ymd_and_hms(2021, 9, 1, 12, 0, s).unwrap();
        stubs
            .listens
            .batch_write_listens(
                "42",
                &[
                    ListenEntry { track_id: "t1".to_string(), played_at: at(0) },
                    ListenEntry { track_id: "t2".to_string(), played_at: at(1) },
                    ListenEntry { track_id: "t1".to_string(), played_at: at(2) },
                ],
            )
            .await
            .unwrap();

        let reply = command(&stubs)
            .handle(&invocation("np", "42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.content(),
            Some("You are listening to Heat Waves - Glass Animals. You've listened to this track 2 times before, and 3 tracks in total.")
        );
    }

    #[tokio::test]
    async fn test_local_file_has_no_track_count() {
        let stubs = Stubs::new(StubDiscord::default());
        stubs.links.upsert_link(&account("42", "tok-42")).await.unwrap();
        stubs.spotify.set_playing("tok-42", local_track("Basement Demo"));
        stubs
            .listens
            .batch_write_listens(
                "42",
                &[ListenEntry {
                    track_id: "t1".to_string(),
                    played_at: Utc.with_ymd_and_hms(2021, 9, 1, 12, 0, 0).unwrap(),
                }],
            )
            .await
            .unwrap();

        let reply = command(&stubs)
            .handle(&invocation("np", "42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.content(),
            Some("You are listening to Basement Demo - unknown. You've listened to this track 0 times before, and 1 tracks in total.")
        );
    }

    #[tokio::test]
    async fn test_nothing_playing() {
        let stubs = Stubs::new(StubDiscord::default());
        stubs.links.upsert_link(&account("42", "tok-42")).await.unwrap();

        let reply = command(&stubs)
            .handle(&invocation("np", "42"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.content().unwrap().contains("aren't listening"));
    }
}
