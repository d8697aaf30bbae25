//! Drains vend outcomes to the identity providers. Keeping this off the
//! orchestrator's own task means a slow or failing provider never stalls the
//! MDB poll loop.

use crate::provider::ProviderChain;
use crate::session::PendingReport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct ReportWorker {
    providers: Arc<ProviderChain>,
    reports_rx: mpsc::Receiver<PendingReport>,
    completed_tx: mpsc::Sender<()>,
}

impl ReportWorker {
    pub fn new(
        providers: Arc<ProviderChain>,
        reports_rx: mpsc::Receiver<PendingReport>,
        completed_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            providers,
            reports_rx,
            completed_tx,
        }
    }

    /// Runs until the sending half of `reports_rx` is dropped.
    pub async fn run(mut self) {
        while let Some(report) = self.reports_rx.recv().await {
            info!(card = %report.card, slot = report.slot, dispensed = report.dispensed, "reporting vend outcome");
            if let Err(e) = self
                .providers
                .report(&report.provider_tag, &report.card, report.slot, report.dispensed)
                .await
            {
                warn!(error = %e, card = %report.card, "failed to report vend outcome");
            }
            if self.completed_tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::local::LocalSqliteProvider;
    use crate::session::CardId;

    #[tokio::test]
    async fn drains_reports_and_signals_completion() {
        let provider = LocalSqliteProvider::open_in_memory(69).unwrap();
        let providers = Arc::new(ProviderChain::new(vec![Box::new(provider)]));
        let (reports_tx, reports_rx) = mpsc::channel(4);
        let (completed_tx, mut completed_rx) = mpsc::channel(4);
        let worker = ReportWorker::new(providers, reports_rx, completed_tx);
        tokio::spawn(worker.run());

        reports_tx
            .send(PendingReport {
                card: CardId("abc".into()),
                slot: 1,
                dispensed: true,
                provider_tag: "local".into(),
            })
            .await
            .unwrap();

        completed_rx.recv().await.expect("completion signal");
    }
}
