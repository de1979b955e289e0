//! Interaction envelope and response shapes.

use chorus_core::providers::{DiscordUser, GuildMember};
use serde::{Deserialize, Serialize};

pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

pub const RESPONSE_PONG: u8 = 1;
pub const RESPONSE_CHANNEL_MESSAGE: u8 = 4;

/// Message flag that shows a reply to the invoking user only.
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

/// An inbound interaction. Only the fields the bot reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Present for invocations inside a guild.
    #[serde(default)]
    pub member: Option<GuildMember>,
    /// Present for invocations in DMs.
    #[serde(default)]
    pub user: Option<DiscordUser>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Interaction {
    /// The user who invoked the command, wherever it was invoked.
    pub fn invoker(&self) -> Option<&DiscordUser> {
        self.member
            .as_ref()
            .map(|m| &m.user)
            .or(self.user.as_ref())
    }

    /// Guild nickname when available, else the user name.
    pub fn invoker_name(&self) -> Option<&str> {
        match (&self.member, &self.user) {
            (Some(member), _) => Some(member.display_name()),
            (None, Some(user)) => Some(user.global_name.as_deref().unwrap_or(&user.username)),
            (None, None) => None,
        }
    }
}

/// The `data` of an application command interaction.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub options: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(MessageData {
                content: content.into(),
                flags: None,
            }),
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(MessageData {
                content: content.into(),
                flags: Some(FLAG_EPHEMERAL),
            }),
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_invocation_uses_member() {
        let raw = r#"{
            "type": 2,
            "id": "i1",
            "guild_id": "g1",
            "member": {"user": {"id": "42", "username": "ann"}, "nick": "Annie"},
            "data": {"id": "c1", "name": "np"}
        }"#;
        let interaction: Interaction = serde_json::from_str(raw).unwrap();
        assert_eq!(interaction.invoker().unwrap().id, "42");
        assert_eq!(interaction.invoker_name(), Some("Annie"));
    }

    #[test]
    fn test_dm_invocation_uses_user() {
        let raw = r#"{"type": 2, "user": {"id": "7", "username": "bob"}}"#;
        let interaction: Interaction = serde_json::from_str(raw).unwrap();
        assert_eq!(interaction.invoker().unwrap().id, "7");
        assert_eq!(interaction.invoker_name(), Some("bob"));
    }

    #[test]
    fn test_pong_serializes_without_data() {
        assert_eq!(
            serde_json::to_string(&InteractionResponse::pong()).unwrap(),
            r#"{"type":1}"#
        );
    }
}
