//! Per-account token refresh.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{AuthToken, Error, LinkStore, LinkedAccount, OAuthFlow, Result};

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Hands out usable access tokens, refreshing them when close to expiry.
///
/// Refreshes are single-flight per account: concurrent callers for the same
/// account wait on one lock, and whoever gets it second finds the already
/// refreshed token in the store instead of spending the refresh token again.
pub struct TokenKeeper {
    links: Arc<dyn LinkStore>,
    oauth: Arc<dyn OAuthFlow>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    margin: Duration,
}

impl TokenKeeper {
    pub fn new(links: Arc<dyn LinkStore>, oauth: Arc<dyn OAuthFlow>) -> Self {
        Self {
            links,
            oauth,
            locks: DashMap::new(),
            margin: Duration::seconds(REFRESH_MARGIN_SECS),
        }
    }

    #[instrument(skip(self, link), fields(account_id = %link.account_id))]
    pub async fn fresh_token(&self, link: &LinkedAccount) -> Result<AuthToken> {
        if !link.token.expires_within(self.margin, Utc::now()) {
            return Ok(link.token.clone());
        }
        if link.token.refresh_token.is_none() {
            warn!("token is expiring and has no refresh token");
            return Ok(link.token.clone());
        }

        let lock = self
            .locks
            .entry(link.account_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let current = self
            .links
            .get_link(&link.account_id)
            .await
            .map_err(Error::persistence)?
            .unwrap_or_else(|| link.clone());

        if !current.token.expires_within(self.margin, Utc::now()) {
            debug!("token already refreshed by a concurrent caller");
            return Ok(current.token);
        }

        let Some(refresh_token) = current.token.refresh_token.clone() else {
            return Ok(current.token);
        };

        let mut refreshed = self
            .oauth
            .refresh(&refresh_token)
            .await
            .map_err(Error::upstream)?;
        // Spotify may omit the refresh token, meaning the old one stays valid.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }

        self.links
            .upsert_link(&LinkedAccount {
                account_id: link.account_id.clone(),
                token: refreshed.clone(),
            })
            .await
            .map_err(Error::persistence)?;

        info!("refreshed access token");
        Ok(refreshed)
    }
}
