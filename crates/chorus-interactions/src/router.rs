//! Signed interaction dispatch.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use chorus_core::providers::{CommandDeclaration, DiscordApi};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::model::{
    CommandData, Interaction, InteractionResponse, INTERACTION_APPLICATION_COMMAND,
    INTERACTION_PING,
};
use crate::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Everything a handler gets for one invocation.
pub struct CommandContext {
    pub interaction: Interaction,
    pub data: CommandData,
    /// Fires when the request that carried this invocation goes away.
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// Id of the invoking Discord user.
    pub fn invoker_id(&self) -> chorus_core::Result<&str> {
        self.interaction
            .invoker()
            .map(|u| u.id.as_str())
            .ok_or_else(|| {
                chorus_core::Error::upstream(anyhow::anyhow!("interaction carries no user"))
            })
    }

    /// Await a step of the handler, failing fast with `Cancelled` once the
    /// command's token fires.
    pub async fn guard<T, F>(&self, fut: F) -> chorus_core::Result<T>
    where
        F: Future<Output = chorus_core::Result<T>>,
    {
        chorus_core::until_cancelled(&self.cancel, fut).await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Name, description and default permission shown by Discord.
    fn declaration(&self) -> CommandDeclaration;

    /// `Ok(None)` acknowledges the interaction without a message.
    async fn handle(&self, ctx: &CommandContext)
        -> chorus_core::Result<Option<InteractionResponse>>;
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("command {0} is already registered")]
    DuplicateCommand(String),

    #[error("invalid request signature")]
    AuthenticationFailure,

    #[error("malformed request body: {0}")]
    MalformedRequest(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unsupported interaction type {0}")]
    UnsupportedInteraction(u8),

    #[error("command failed: {0}")]
    Handler(#[source] chorus_core::Error),
}

impl RouterError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::AuthenticationFailure | RouterError::MalformedRequest(_) => {
                StatusCode::UNAUTHORIZED
            }
            RouterError::UnknownCommand(_) | RouterError::UnsupportedInteraction(_) => {
                StatusCode::NOT_FOUND
            }
            RouterError::DuplicateCommand(_) | RouterError::Handler(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message put on the wire. Internal detail never leaves the process.
    pub fn category(&self) -> &'static str {
        match self {
            RouterError::AuthenticationFailure => "invalid request signature",
            RouterError::MalformedRequest(_) => "malformed request body",
            RouterError::UnknownCommand(_) => "unknown command",
            RouterError::UnsupportedInteraction(_) => "unsupported interaction type",
            RouterError::DuplicateCommand(_) | RouterError::Handler(_) => "internal error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.status().as_u16(),
            error: self.category(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub error: &'static str,
}

/// Result of routing one request, with the command name it resolved to.
#[derive(Debug)]
pub struct Routed {
    pub command: Option<String>,
    pub outcome: Result<Option<InteractionResponse>, RouterError>,
}

impl Routed {
    fn unnamed(outcome: Result<Option<InteractionResponse>, RouterError>) -> Self {
        Self {
            command: None,
            outcome,
        }
    }
}

/// Immutable after startup: built, registered, then shared behind an `Arc`.
pub struct CommandRouter {
    verifier: SignatureVerifier,
    handlers: Vec<Box<dyn CommandHandler>>,
    by_name: HashMap<String, usize>,
}

impl CommandRouter {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self {
            verifier,
            handlers: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Add handlers. A name already registered, or repeated within
    /// `handlers`, rejects the whole batch.
    pub fn register(&mut self, handlers: Vec<Box<dyn CommandHandler>>) -> Result<(), RouterError> {
        let mut incoming: HashSet<String> = HashSet::new();
        for handler in &handlers {
            let name = handler.declaration().name;
            if self.by_name.contains_key(&name) || !incoming.insert(name.clone()) {
                return Err(RouterError::DuplicateCommand(name));
            }
        }

        for handler in handlers {
            let name = handler.declaration().name;
            info!(command = %name, "registering command");
            self.by_name.insert(name, self.handlers.len());
            self.handlers.push(handler);
        }
        Ok(())
    }

    /// Declarations in registration order.
    pub fn declarations(&self) -> Vec<CommandDeclaration> {
        self.handlers.iter().map(|h| h.declaration()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Push every declaration to Discord, globally or into one guild. Stops
    /// at the first failure; commands declared before it stay declared.
    #[instrument(skip(self, discord))]
    pub async fn sync_declarations(
        &self,
        discord: &dyn DiscordApi,
        guild_id: Option<&str>,
    ) -> chorus_core::Result<()> {
        let application_id = discord.current_user().await?.id;

        for declaration in self.declarations() {
            discord
                .upsert_command(&application_id, guild_id, &declaration)
                .await?;
            info!(command = %declaration.name, "declared command");
        }
        Ok(())
    }

    /// Verify, decode and dispatch one interaction.
    #[instrument(skip_all, fields(command = tracing::field::Empty))]
    pub async fn handle_request(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        cancel: CancellationToken,
    ) -> Routed {
        if !self.signature_valid(raw_body, headers) {
            warn!("rejected interaction with invalid signature");
            return Routed::unnamed(Err(RouterError::AuthenticationFailure));
        }

        let interaction: Interaction = match serde_json::from_slice(raw_body) {
            Ok(interaction) => interaction,
            Err(e) => {
                warn!(error = %e, "malformed interaction body");
                return Routed::unnamed(Err(RouterError::MalformedRequest(e.to_string())));
            }
        };

        match interaction.kind {
            INTERACTION_PING => {
                debug!("ping");
                Routed::unnamed(Ok(Some(InteractionResponse::pong())))
            }
            INTERACTION_APPLICATION_COMMAND => self.dispatch(interaction, cancel).await,
            other => {
                warn!(kind = other, "unsupported interaction type");
                Routed::unnamed(Err(RouterError::UnsupportedInteraction(other)))
            }
        }
    }

    fn signature_valid(&self, raw_body: &[u8], headers: &HeaderMap) -> bool {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        match (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER)) {
            (Some(signature), Some(timestamp)) => {
                self.verifier.verify(timestamp, raw_body, signature)
            }
            _ => false,
        }
    }

    async fn dispatch(&self, mut interaction: Interaction, cancel: CancellationToken) -> Routed {
        let data: CommandData = match interaction
            .data
            .take()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(data)) => data,
            Ok(None) => {
                return Routed::unnamed(Err(RouterError::MalformedRequest(
                    "application command without data".to_string(),
                )))
            }
            Err(e) => return Routed::unnamed(Err(RouterError::MalformedRequest(e.to_string()))),
        };

        let name = data.name.clone();
        Span::current().record("command", name.as_str());

        let Some(&index) = self.by_name.get(&name) else {
            warn!("no handler for command");
            return Routed {
                command: Some(name.clone()),
                outcome: Err(RouterError::UnknownCommand(name)),
            };
        };

        let ctx = CommandContext {
            interaction,
            data,
            cancel,
        };
        let outcome = match self.handlers[index].handle(&ctx).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(error = %e, "command handler failed");
                Err(RouterError::Handler(e))
            }
        };

        Routed {
            command: Some(name),
            outcome,
        }
    }
}
