use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chorus_core::{AppConfig, Core};
use chorus_interactions::{build_router, builtin, AppState, CommandRouter, Services, SignatureVerifier};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let verifier = SignatureVerifier::from_bytes(&config.discord_public_key)
        .context("DISCORD_PUBLIC_KEY is not a valid ed25519 key")?;
    let core = Core::init(config).await.context("failed to initialize core")?;

    let services = Services::from_core(&core);
    let mut router = CommandRouter::new(verifier);
    router.register(builtin(&services))?;
    let router = Arc::new(router);

    // Declaration is best-effort: the webhook still works with whatever
    // Discord already has on record.
    let scope = core.config.test_guild_id.as_deref();
    match router.sync_declarations(core.discord.as_ref(), scope).await {
        Ok(()) => info!(guild = ?scope, commands = router.len(), "commands declared"),
        Err(err) => warn!("Failed to declare commands: {}", err),
    }

    let shutdown = CancellationToken::new();

    let scraper = core.scraper();
    let scraper_cancel = shutdown.child_token();
    let scraper_task = tokio::spawn(async move {
        scraper.run(scraper_cancel).await;
    });

    let app = build_router(AppState {
        router,
        oauth: services.oauth.clone(),
        links: services.links.clone(),
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(&core.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", core.config.listen_addr))?;
    info!("Chorus listening on {}", core.config.listen_addr);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("Shutting down...");
            server_shutdown.cancel();
        })
        .await;

    // Covers the server stopping on its own, too.
    shutdown.cancel();
    if let Err(err) = scraper_task.await {
        error!("Scraper task panicked: {}", err);
    }

    served.context("HTTP server failed")?;
    info!("Chorus stopped");
    Ok(())
}

async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        // Without a signal handler there is nothing to wait for.
        std::future::pending::<()>().await;
    }
}
