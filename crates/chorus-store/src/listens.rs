//! Listening history.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{format_ts, parse_ts, SqliteStore};

/// One play of one track, timestamped by Spotify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEntry {
    pub track_id: String,
    pub played_at: DateTime<Utc>,
}

#[async_trait]
pub trait ListenStore: Send + Sync {
    /// Latest `played_at` recorded for the account, if any.
    async fn last_listen_time(&self, account_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn track_listen_count(&self, account_id: &str, track_id: &str) -> Result<i64>;

    async fn account_listen_count(&self, account_id: &str) -> Result<i64>;

    /// Total listens per account, highest first.
    async fn listen_counts(&self) -> Result<Vec<(String, i64)>>;

    /// Insert all entries in one transaction, ignoring rows that already
    /// exist. Returns how many rows were new. Any failure rolls back the
    /// whole batch.
    async fn batch_write_listens(&self, account_id: &str, entries: &[ListenEntry]) -> Result<u64>;
}

#[async_trait]
impl ListenStore for SqliteStore {
    #[instrument(skip(self))]
    async fn last_listen_time(&self, account_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT played_at FROM listens WHERE account_id = ?1 ORDER BY played_at DESC LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|(played_at,)| parse_ts(&played_at)).transpose()
    }

    #[instrument(skip(self))]
    async fn track_listen_count(&self, account_id: &str, track_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM listens WHERE account_id = ?1 AND track_id = ?2",
        )
        .bind(account_id)
        .bind(track_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn account_listen_count(&self, account_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listens WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn listen_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT account_id, COUNT(*) AS listens FROM listens \
             GROUP BY account_id ORDER BY listens DESC, account_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    async fn batch_write_listens(&self, account_id: &str, entries: &[ListenEntry]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;

        for entry in entries {
            let result = sqlx::query(
                "INSERT INTO listens (account_id, track_id, played_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(account_id)
            .bind(&entry.track_id)
            .bind(format_ts(entry.played_at))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        // Dropping `tx` on an early return rolls the batch back.
        tx.commit().await?;
        Ok(inserted)
    }
}
