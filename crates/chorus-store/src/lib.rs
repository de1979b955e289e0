//! Chorus Store - SQLite persistence for the bot.
//!
//! Two logical stores share one pool:
//!
//! - **Links** (`LinkStore`): Discord account id -> Spotify token pair
//! - **Listens** (`ListenStore`): append-only listening history, unique per
//!   `(account_id, track_id, played_at)`
//!
//! Both are implemented by [`SqliteStore`]; callers depend on the traits so
//! tests can swap in stubs.

pub mod links;
pub mod listens;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tracing::instrument;

pub use chorus_auth_bridge::AuthToken;
pub use links::{LinkStore, LinkedAccount};
pub use listens::{ListenEntry, ListenStore};

/// SQLite-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and bootstrap the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {}", url))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database on a single connection (every pooled
    /// connection to `sqlite::memory:` would otherwise see its own database).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema must be initialised separately.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS linked_accounts (
                account_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS listens (
                account_id TEXT NOT NULL,
                track_id TEXT NOT NULL CHECK (track_id <> ''),
                played_at TEXT NOT NULL,
                UNIQUE(account_id, track_id, played_at)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_listens_account_played ON listens(account_id, played_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {}", raw))
}

#[cfg(test)]
pub(crate) async fn test_store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}
