use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::providers::CommandDeclaration;
use chorus_core::{Error, OAuthFlow};
use tracing::info;

use super::declaration;
use crate::model::InteractionResponse;
use crate::router::{CommandContext, CommandHandler};

/// `/register`: hands out a Spotify authorization link whose `state` is the
/// invoker's Discord id, so the callback knows whom to link.
pub struct RegisterCommand {
    oauth: Arc<dyn OAuthFlow>,
}

impl RegisterCommand {
    pub fn new(oauth: Arc<dyn OAuthFlow>) -> Self {
        Self { oauth }
    }
}

#[async_trait]
impl CommandHandler for RegisterCommand {
    fn declaration(&self) -> CommandDeclaration {
        declaration("register", "Links your Spotify account to your Discord account")
    }

    async fn handle(&self, ctx: &CommandContext) -> chorus_core::Result<Option<InteractionResponse>> {
        let account_id = ctx.invoker_id()?;
        let url = self
            .oauth
            .authorize_url(account_id)
            .map_err(Error::upstream)?;

        info!(account_id, "issued authorization link");
        Ok(Some(InteractionResponse::ephemeral(format!(
            "Howdy! Visit: {}",
            url
        ))))
    }
}
