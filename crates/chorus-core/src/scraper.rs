//! Background import of listening history.
//!
//! Each pass walks every linked account in store order and pulls the plays
//! Spotify has recorded since that account's watermark (its latest stored
//! `played_at`). Inserts are idempotent, so re-fetching an overlap is
//! harmless.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{FailurePolicy, ScraperConfig};
use crate::providers::SpotifyApi;
use crate::{Error, LinkStore, LinkedAccount, ListenEntry, ListenStore, Result, TokenKeeper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReport {
    pub account_id: String,
    pub fetched: usize,
    pub inserted: u64,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFailure {
    pub account_id: String,
    pub error: String,
}

/// Outcome of one pass over every linked account.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub accounts: Vec<AccountReport>,
    pub failures: Vec<AccountFailure>,
    pub duration: Duration,
}

impl PassReport {
    pub fn records_inserted(&self) -> u64 {
        self.accounts.iter().map(|a| a.inserted).sum()
    }
}

/// Start of the fetch window: just past the watermark, or the Unix epoch
/// when the account has no stored plays yet.
pub fn lower_bound(watermark: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match watermark {
        Some(latest) => latest + chrono::Duration::milliseconds(1),
        None => DateTime::<Utc>::UNIX_EPOCH,
    }
}

pub struct HistoryScraper {
    links: Arc<dyn LinkStore>,
    listens: Arc<dyn ListenStore>,
    spotify: Arc<dyn SpotifyApi>,
    tokens: Arc<TokenKeeper>,
    config: ScraperConfig,
    pass_guard: Mutex<()>,
}

impl HistoryScraper {
    pub fn new(
        links: Arc<dyn LinkStore>,
        listens: Arc<dyn ListenStore>,
        spotify: Arc<dyn SpotifyApi>,
        tokens: Arc<TokenKeeper>,
        config: ScraperConfig,
    ) -> Self {
        Self {
            links,
            listens,
            spotify,
            tokens,
            config,
            pass_guard: Mutex::new(()),
        }
    }

    /// Run passes every `interval` until `cancel` fires. A pass in flight is
    /// allowed to finish; the wait between passes is interrupted.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval_secs,
            "history scraper started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(report) => info!(
                    accounts = report.accounts.len(),
                    failures = report.failures.len(),
                    records = report.records_inserted(),
                    duration_ms = report.duration.as_millis() as u64,
                    "scrape pass complete"
                ),
                Err(e) => error!(error = %e, "scrape pass failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }

        info!("history scraper stopped");
    }

    /// One pass over every linked account.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<PassReport> {
        let Ok(_pass) = self.pass_guard.try_lock() else {
            return Err(Error::PassInProgress);
        };

        let started = Instant::now();
        let links = self.links.get_links().await.map_err(Error::persistence)?;
        let mut report = PassReport::default();

        for link in &links {
            match self.scrape_account(link).await {
                Ok(account) => report.accounts.push(account),
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::AbortPass => return Err(e),
                    FailurePolicy::ContinueOnError => {
                        warn!(account_id = %link.account_id, error = %e, "account scrape failed");
                        report.failures.push(AccountFailure {
                            account_id: link.account_id.clone(),
                            error: e.to_string(),
                        });
                    }
                },
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Fetch and store everything played since the account's watermark.
    #[instrument(skip(self, link), fields(account_id = %link.account_id))]
    pub async fn scrape_account(&self, link: &LinkedAccount) -> Result<AccountReport> {
        let watermark = self
            .listens
            .last_listen_time(&link.account_id)
            .await
            .map_err(Error::persistence)?;
        let mut after = lower_bound(watermark);
        let token = self.tokens.fresh_token(link).await?;

        let page_size = self.config.page_size.max(1);
        let max_pages = self.config.max_pages.max(1);
        let mut entries: Vec<ListenEntry> = Vec::new();
        let mut fetched = 0;
        let mut pages = 0;

        loop {
            let page = self.spotify.recently_played(&token, after, page_size).await?;
            pages += 1;
            fetched += page.len();
            let full = page.len() as u32 >= page_size;

            // Local files have no track id; the cursor still moves past them.
            if let Some(newest) = page.iter().map(|p| p.played_at).max() {
                after = lower_bound(Some(newest));
            }
            entries.extend(page.into_iter().filter_map(|p| {
                Some(ListenEntry {
                    track_id: p.track.id?,
                    played_at: p.played_at,
                })
            }));

            if !full {
                break;
            }
            if pages >= max_pages {
                warn!(pages, "recently played history truncated at page cap");
                break;
            }
        }

        if entries.len() < fetched {
            debug!(skipped = fetched - entries.len(), "skipped plays without a track id");
        }
        let inserted = if entries.is_empty() {
            0
        } else {
            self.listens
                .batch_write_listens(&link.account_id, &entries)
                .await
                .map_err(Error::persistence)?
        };

        debug!(fetched, records = inserted, pages, "account scraped");
        Ok(AccountReport {
            account_id: link.account_id.clone(),
            fetched,
            inserted,
            pages,
        })
    }
}
