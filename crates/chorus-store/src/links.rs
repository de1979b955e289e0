//! Linked accounts: Discord user id -> Spotify token pair.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{format_ts, parse_ts, AuthToken, SqliteStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    /// Discord user id (snowflake, as text).
    pub account_id: String,
    pub token: AuthToken,
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// `Ok(None)` when the account never linked.
    async fn get_link(&self, account_id: &str) -> Result<Option<LinkedAccount>>;

    /// Every linked account, ordered by account id.
    async fn get_links(&self) -> Result<Vec<LinkedAccount>>;

    /// Insert, or overwrite the token fields of an existing link.
    async fn upsert_link(&self, link: &LinkedAccount) -> Result<()>;
}

type LinkRow = (String, String, Option<String>, Option<String>);

fn from_row((account_id, access_token, refresh_token, expires_at): LinkRow) -> Result<LinkedAccount> {
    let expires_at = expires_at.as_deref().map(parse_ts).transpose()?;
    Ok(LinkedAccount {
        account_id,
        token: AuthToken {
            access_token,
            refresh_token,
            expires_at,
        },
    })
}

#[async_trait]
impl LinkStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_link(&self, account_id: &str) -> Result<Option<LinkedAccount>> {
        let row = sqlx::query_as::<_, LinkRow>(
            "SELECT account_id, access_token, refresh_token, expires_at \
             FROM linked_accounts WHERE account_id = ?1",
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_links(&self) -> Result<Vec<LinkedAccount>> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT account_id, access_token, refresh_token, expires_at \
             FROM linked_accounts ORDER BY account_id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    #[instrument(skip(self, link), fields(account_id = %link.account_id))]
    async fn upsert_link(&self, link: &LinkedAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO linked_accounts (account_id, access_token, refresh_token, expires_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(account_id) DO UPDATE SET \
                access_token = excluded.access_token, \
                refresh_token = excluded.refresh_token, \
                expires_at = excluded.expires_at",
        )
        .bind(&link.account_id)
        .bind(&link.token.access_token)
        .bind(&link.token.refresh_token)
        .bind(link.token.expires_at.map(format_ts))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;
    use chrono::{TimeZone, Utc};

    fn link(account_id: &str, access: &str) -> LinkedAccount {
        LinkedAccount {
            account_id: account_id.to_string(),
            token: AuthToken {
                access_token: access.to_string(),
                refresh_token: Some(format!("{}-refresh", access)),
                expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            },
        }
    }

    #[tokio::test]
    async fn test_get_missing_link() {
        let store = test_store().await;
        assert!(store.get_link("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_token() {
        let store = test_store().await;
        store.upsert_link(&link("A", "first")).await.unwrap();
        store.upsert_link(&link("A", "second")).await.unwrap();

        let stored = store.get_link("A").await.unwrap().unwrap();
        assert_eq!(stored, link("A", "second"));
        assert_eq!(store.get_links().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_links_ordered() {
        let store = test_store().await;
        store.upsert_link(&link("B", "b")).await.unwrap();
        store.upsert_link(&link("A", "a")).await.unwrap();

        let mut without_expiry = link("C", "c");
        without_expiry.token.refresh_token = None;
        without_expiry.token.expires_at = None;
        store.upsert_link(&without_expiry).await.unwrap();

        let links = store.get_links().await.unwrap();
        let ids: Vec<_> = links.iter().map(|l| l.account_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(links[2], without_expiry);
    }
}
