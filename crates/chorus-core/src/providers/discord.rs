//! Discord REST client (bot token auth).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{call_with_backoff, DiscordApi};
use crate::Result;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    pub user: DiscordUser,
    #[serde(default)]
    pub nick: Option<String>,
}

impl GuildMember {
    /// Guild nickname, then global name, then username.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.user.global_name.as_deref())
            .unwrap_or(&self.user.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

/// What Discord needs to show a slash command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDeclaration {
    pub name: String,
    pub description: String,
    pub default_permission: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCommand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// `reqwest` implementation of [`DiscordApi`].
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http_client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl DiscordClient {
    pub fn new(http_client: reqwest::Client, bot_token: &str) -> Self {
        Self::with_base_url(http_client, bot_token, DISCORD_API_BASE)
    }

    pub fn with_base_url(http_client: reqwest::Client, bot_token: &str, base_url: &str) -> Self {
        Self {
            http_client,
            bot_token: bot_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn commands_url(&self, application_id: &str, guild_id: Option<&str>) -> String {
        match guild_id {
            Some(guild_id) => format!(
                "{}/applications/{}/guilds/{}/commands",
                self.base_url, application_id, guild_id
            ),
            None => format!("{}/applications/{}/commands", self.base_url, application_id),
        }
    }
}

#[async_trait]
impl DiscordApi for DiscordClient {
    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<DiscordUser> {
        let url = format!("{}/users/@me", self.base_url);
        let auth = self.authorization();

        let response = call_with_backoff("discord", || {
            self.http_client.get(&url).header("Authorization", &auth)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn list_guild_members(
        &self,
        guild_id: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<GuildMember>> {
        let url = format!("{}/guilds/{}/members", self.base_url, guild_id);
        let auth = self.authorization();
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let response = call_with_backoff("discord", || {
            self.http_client
                .get(&url)
                .header("Authorization", &auth)
                .query(&query)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn get_guild(&self, guild_id: &str) -> Result<Guild> {
        let url = format!("{}/guilds/{}", self.base_url, guild_id);
        let auth = self.authorization();

        let response = call_with_backoff("discord", || {
            self.http_client.get(&url).header("Authorization", &auth)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self, declaration), fields(command = %declaration.name))]
    async fn upsert_command(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
        declaration: &CommandDeclaration,
    ) -> Result<RegisteredCommand> {
        let url = self.commands_url(application_id, guild_id);
        let auth = self.authorization();

        // POST on an existing name overwrites that command.
        let response = call_with_backoff("discord", || {
            self.http_client
                .post(&url)
                .header("Authorization", &auth)
                .json(declaration)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn list_commands(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
    ) -> Result<Vec<RegisteredCommand>> {
        let url = self.commands_url(application_id, guild_id);
        let auth = self.authorization();

        let response = call_with_backoff("discord", || {
            self.http_client.get(&url).header("Authorization", &auth)
        })
        .await?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn delete_command(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
        command_id: &str,
    ) -> Result<()> {
        let url = format!("{}/{}", self.commands_url(application_id, guild_id), command_id);
        let auth = self.authorization();

        call_with_backoff("discord", || {
            self.http_client.delete(&url).header("Authorization", &auth)
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(json: &str) -> GuildMember {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_display_name_precedence() {
        let nicked = member(r#"{"user": {"id": "1", "username": "u", "global_name": "G"}, "nick": "N"}"#);
        assert_eq!(nicked.display_name(), "N");

        let global = member(r#"{"user": {"id": "1", "username": "u", "global_name": "G"}}"#);
        assert_eq!(global.display_name(), "G");

        let plain = member(r#"{"user": {"id": "1", "username": "u"}}"#);
        assert_eq!(plain.display_name(), "u");
    }

    #[test]
    fn test_commands_url_scope() {
        let client = DiscordClient::with_base_url(reqwest::Client::new(), "t", "http://d/api/");
        assert_eq!(client.commands_url("app", None), "http://d/api/applications/app/commands");
        assert_eq!(
            client.commands_url("app", Some("g")),
            "http://d/api/applications/app/guilds/g/commands"
        );
        assert_eq!(client.authorization(), "Bot t");
    }
}
