use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::services::LedgerService;

/// Runs the ledger audit on a cron schedule.
pub struct BackgroundScheduler {
    scheduler: JobScheduler,
}

impl BackgroundScheduler {
    pub async fn new(ledger: Arc<LedgerService>, audit_cron: &str) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        scheduler
            .add(Job::new_async(audit_cron, move |_uuid, _l| {
                let ledger = ledger.clone();
                Box::pin(async move {
                    run_ledger_audit(&ledger).await;
                })
            })?)
            .await?;

        scheduler.start().await?;
        info!(cron = audit_cron, "Background scheduler started");

        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Background scheduler did not stop cleanly: {}", e);
        }
        info!("Background scheduler stopped");
    }
}

/// One audit pass; findings are logged, never repaired automatically.
pub async fn run_ledger_audit(ledger: &LedgerService) {
    match ledger.audit().await {
        Ok(report) if report.is_clean() => {
            info!(wallets = report.wallets_checked, "Ledger audit clean");
        }
        Ok(report) => {
            for drift in &report.drift {
                error!(
                    wallet_id = %drift.wallet_id,
                    currency = %drift.currency,
                    projected = %drift.projected_available,
                    ledger = %drift.ledger_available,
                    "Wallet projection drifted from ledger"
                );
            }
            for entry_set in &report.unbalanced_entry_sets {
                error!(%entry_set, "Unbalanced ledger entry set");
            }
        }
        Err(e) => error!("Ledger audit failed: {}", e),
    }
}
