use anyhow::{Context, Result};

use chorus_core::providers::DiscordApi;
use chorus_core::Core;
use chorus_interactions::{builtin, CommandRouter, Services, SignatureVerifier};

use crate::ui;

pub async fn list(core: &Core, guild: Option<&str>) -> Result<()> {
    let application_id = core.discord.current_user().await?.id;
    let commands = core.discord.list_commands(&application_id, guild).await?;

    ui::header(&format!("Commands ({})", ui::scope_label(guild)));
    if commands.is_empty() {
        ui::info("No commands declared.");
        return Ok(());
    }
    for command in commands {
        ui::info(&format!("/{:<12} {}  [{}]", command.name, command.description, command.id));
    }
    Ok(())
}

pub async fn reset(core: &Core, guild: Option<&str>, yes: bool) -> Result<()> {
    let scope = ui::scope_label(guild);
    let application_id = core.discord.current_user().await?.id;
    let commands = core.discord.list_commands(&application_id, guild).await?;

    if commands.is_empty() {
        ui::info(&format!("No {} commands to delete.", scope));
        return Ok(());
    }
    if !yes && !ui::prompt_confirm(&format!("Delete {} {} commands?", commands.len(), scope))? {
        ui::info("Nothing deleted.");
        return Ok(());
    }

    let mut failed = 0;
    for command in &commands {
        match core
            .discord
            .delete_command(&application_id, guild, &command.id)
            .await
        {
            Ok(()) => ui::success(&format!("Deleted /{}", command.name)),
            Err(err) => {
                failed += 1;
                ui::error(&format!("Failed to delete /{}: {}", command.name, err));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} commands could not be deleted", failed, commands.len());
    }
    Ok(())
}

pub async fn sync(core: &Core, guild: Option<&str>) -> Result<()> {
    let verifier = SignatureVerifier::from_bytes(&core.config.discord_public_key)
        .context("DISCORD_PUBLIC_KEY is not a valid ed25519 key")?;
    let mut router = CommandRouter::new(verifier);
    router.register(builtin(&Services::from_core(core)))?;

    router
        .sync_declarations(core.discord.as_ref(), guild)
        .await
        .context("failed to declare commands")?;

    for declaration in router.declarations() {
        ui::success(&format!("Declared /{}", declaration.name));
    }
    ui::info(&format!("Scope: {}", ui::scope_label(guild)));
    Ok(())
}
