//! Chorus Interactions - the Discord-facing side of the bot.
//!
//! Inbound interactions arrive as signed webhooks. [`CommandRouter`] checks
//! the signature, decodes the envelope and hands application commands to
//! the registered [`CommandHandler`]s. [`http::build_router`] mounts it next
//! to the Spotify OAuth callback.

pub mod commands;
pub mod http;
pub mod model;
pub mod router;
pub mod signature;

pub use commands::{builtin, Services};
pub use http::{build_router, AppState};
pub use model::{CommandData, Interaction, InteractionResponse};
pub use router::{CommandContext, CommandHandler, CommandRouter, Routed, RouterError};
pub use signature::SignatureVerifier;
