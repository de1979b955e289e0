use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chorus_core::{AppConfig, Core};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "Admin tools for the Chorus Discord bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the slash commands declared with Discord
    Commands {
        #[command(subcommand)]
        command: DeclarationCommand,
    },

    /// Run one history scrape pass over every linked account
    Scrape,
}

#[derive(Subcommand)]
enum DeclarationCommand {
    /// List declared commands
    List {
        /// Guild to inspect instead of the global scope
        #[arg(long)]
        guild: Option<String>,
    },
    /// Delete every declared command
    Reset {
        /// Guild to reset instead of the global scope
        #[arg(long)]
        guild: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Declare the built-in commands
    Sync {
        /// Guild to declare into instead of the global scope
        #[arg(long)]
        guild: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Debug logs stay hidden unless RUST_LOG asks for them
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    let core = Core::init(config).await.context("failed to initialize core")?;

    match cli.command {
        Command::Commands { command } => match command {
            DeclarationCommand::List { guild } => {
                commands::declarations::list(&core, guild.as_deref()).await
            }
            DeclarationCommand::Reset { guild, yes } => {
                commands::declarations::reset(&core, guild.as_deref(), yes).await
            }
            DeclarationCommand::Sync { guild } => {
                commands::declarations::sync(&core, guild.as_deref()).await
            }
        },
        Command::Scrape => commands::scrape::run(&core).await,
    }
}
