use anyhow::Result;

use chorus_core::{Core, PassReport};

use crate::ui;

pub async fn run(core: &Core) -> Result<()> {
    ui::header("Scraping listening history");

    let report = core.scraper().run_once().await?;

    for account in &report.accounts {
        ui::info(&format!(
            "{}: {} new of {} fetched",
            account.account_id, account.inserted, account.fetched
        ));
    }
    for failure in &report.failures {
        ui::error(&format!("{}: {}", failure.account_id, failure.error));
    }

    if report.failures.is_empty() {
        ui::success(&summary(&report));
    } else {
        ui::warn(&summary(&report));
    }
    Ok(())
}

fn summary(report: &PassReport) -> String {
    format!(
        "{} accounts, {} new listens, {} failed in {:.1}s",
        report.accounts.len(),
        report.records_inserted(),
        report.failures.len(),
        report.duration.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{AccountFailure, AccountReport};
    use std::time::Duration;

    #[test]
    fn test_summary() {
        let report = PassReport {
            accounts: vec![
                AccountReport {
                    account_id: "A".to_string(),
                    fetched: 4,
                    inserted: 3,
                    pages: 1,
                },
                AccountReport {
                    account_id: "C".to_string(),
                    fetched: 2,
                    inserted: 2,
                    pages: 1,
                },
            ],
            failures: vec![AccountFailure {
                account_id: "B".to_string(),
                error: "upstream call failed".to_string(),
            }],
            duration: Duration::from_millis(1500),
        };
        assert_eq!(summary(&report), "2 accounts, 5 new listens, 1 failed in 1.5s");
    }
}
