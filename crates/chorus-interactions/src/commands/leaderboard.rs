use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::providers::{all_guild_members, CommandDeclaration, DiscordApi};
use chorus_core::{Error, ListenStore};

use super::declaration;
use crate::model::InteractionResponse;
use crate::router::{CommandContext, CommandHandler};

/// `/leaderboard`: the guild member with the most recorded listens.
pub struct LeaderboardCommand {
    discord: Arc<dyn DiscordApi>,
    listens: Arc<dyn ListenStore>,
    max_member_pages: usize,
}

impl LeaderboardCommand {
    /// `max_member_pages` bounds the guild member listing, as for playlists.
    pub fn new(
        discord: Arc<dyn DiscordApi>,
        listens: Arc<dyn ListenStore>,
        max_member_pages: usize,
    ) -> Self {
        Self {
            discord,
            listens,
            max_member_pages,
        }
    }
}

#[async_trait]
impl CommandHandler for LeaderboardCommand {
    fn declaration(&self) -> CommandDeclaration {
        declaration("leaderboard", "Shows who in this server has listened the most")
    }

    async fn handle(&self, ctx: &CommandContext) -> chorus_core::Result<Option<InteractionResponse>> {
        let Some(guild_id) = ctx.interaction.guild_id.as_deref() else {
            return Ok(Some(InteractionResponse::ephemeral(
                "This command only works inside a server.",
            )));
        };

        let members = ctx
            .guard(all_guild_members(self.discord.as_ref(), guild_id, self.max_member_pages))
            .await?;
        let names: HashMap<&str, &str> = members
            .iter()
            .map(|m| (m.user.id.as_str(), m.display_name()))
            .collect();

        // Highest count first, so the first guild member found is the champion.
        let counts = self.listens.listen_counts().await.map_err(Error::persistence)?;
        let champion = counts
            .iter()
            .filter(|(_, listens)| *listens > 0)
            .find_map(|(account_id, listens)| {
                names.get(account_id.as_str()).map(|name| (*name, *listens))
            });

        let content = match champion {
            Some((name, listens)) => format!("The champion is {} with {} scrobbles!", name, listens),
            None => "Nobody in this server has any scrobbles yet.".to_string(),
        };
        Ok(Some(InteractionResponse::message(content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{invocation, Stubs};
    use chorus_core::testing::StubDiscord;
    use chorus_core::ListenEntry;
    use chrono::{Duration, TimeZone, Utc};

    fn plays(n: i64) -> Vec<ListenEntry> {
        let t0 = Utc.with_ymd_and_hms(2021, 9, 1, 12, 0, 0).unwrap();
        (0..n)
            .map(|i| ListenEntry {
                track_id: format!("t{}", i),
                played_at: t0 + Duration::seconds(i),
            })
            .collect()
    }

    fn command(stubs: &Stubs) -> LeaderboardCommand {
        let services = stubs.services();
        LeaderboardCommand::new(services.discord, services.listens, services.max_member_pages)
    }

    #[tokio::test]
    async fn test_champion_is_limited_to_guild_members() {
        let stubs = Stubs::new(StubDiscord::with_members(&["A", "B"]));
        stubs.listens.batch_write_listens("A", &plays(3)).await.unwrap();
        stubs.listens.batch_write_listens("B", &plays(5)).await.unwrap();
        // Not in this guild.
        stubs.listens.batch_write_listens("Z", &plays(9)).await.unwrap();

        let reply = command(&stubs)
            .handle(&invocation("leaderboard", "A"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content(), Some("The champion is user-B with 5 scrobbles!"));
    }

    #[tokio::test]
    async fn test_member_listing_respects_page_cap() {
        let ids: Vec<String> = (0..2500).map(|i| format!("m{:04}", i)).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let stubs = Stubs::new(StubDiscord::with_members(&ids));
        // Only reachable on the third page.
        stubs.listens.batch_write_listens("m2400", &plays(7)).await.unwrap();
        stubs.listens.batch_write_listens("m0010", &plays(2)).await.unwrap();

        let services = stubs.services();
        let reply = LeaderboardCommand::new(services.discord, services.listens, 2)
            .handle(&invocation("leaderboard", "m0000"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stubs.discord.member_page_calls(), 2);
        assert_eq!(reply.content(), Some("The champion is user-m0010 with 2 scrobbles!"));
    }

    #[tokio::test]
    async fn test_no_listens() {
        let stubs = Stubs::new(StubDiscord::with_members(&["A"]));
        let reply = command(&stubs)
            .handle(&invocation("leaderboard", "A"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.content().unwrap().starts_with("Nobody"));
    }
}
