//! Ties a card scan to a credit balance, a credit balance to a vend
//! approval, and a vend outcome back to the identity providers. Talks to the
//! [`crate::mdb::engine::MdbEngine`] only over channels; owns no serial I/O.

use crate::cardreader::CardEvent;
use crate::error::Result;
use crate::mdb::DisplayRequest;
use crate::provider::ProviderChain;
use crate::session::{CardId, EngineRequest, PendingReport, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Orchestrator {
    providers: Arc<ProviderChain>,
    open_session: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    display_tx: mpsc::Sender<DisplayRequest>,
    reports_tx: mpsc::Sender<PendingReport>,
    session: Option<Session>,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<ProviderChain>,
        open_session: Arc<AtomicBool>,
        display_tx: mpsc::Sender<DisplayRequest>,
        reports_tx: mpsc::Sender<PendingReport>,
    ) -> Self {
        Self {
            providers,
            open_session,
            in_flight: Arc::new(AtomicBool::new(false)),
            display_tx,
            reports_tx,
            session: None,
        }
    }

    /// Drives the orchestrator until every input channel closes.
    pub async fn run(
        mut self,
        mut engine_rx: mpsc::Receiver<EngineRequest>,
        mut card_rx: mpsc::Receiver<CardEvent>,
        mut completed_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                req = engine_rx.recv() => match req {
                    Some(req) => self.handle_engine_request(req).await?,
                    None => break,
                },
                event = card_rx.recv() => match event {
                    Some(event) => self.handle_card_event(event).await?,
                    None => break,
                },
                done = completed_rx.recv() => match done {
                    Some(()) => {
                        self.in_flight.store(false, Ordering::Release);
                        self.session = None;
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    async fn handle_engine_request(&mut self, req: EngineRequest) -> Result<()> {
        match req {
            EngineRequest::CreditQuery { reply } => {
                let credits = self.session.as_ref().map(|s| s.credits_remaining).unwrap_or(0);
                let _ = reply.send(credits);
            }
            EngineRequest::DispenseAck { slot, reply } => {
                match self.session.take() {
                    Some(session) => {
                        self.in_flight.store(true, Ordering::Release);
                        let report = PendingReport {
                            card: session.card,
                            slot,
                            dispensed: true,
                            provider_tag: session.provider_tag,
                        };
                        let _ = self.reports_tx.send(report).await;
                    }
                    None => {
                        // Never debit below 0: a spurious dispense-ack with no
                        // open session is logged and ignored rather than
                        // killing the orchestrator task.
                        warn!(slot, "dispense acknowledged with no open session; ignoring");
                    }
                }
                let _ = reply.send(());
            }
        }
        Ok(())
    }

    async fn handle_card_event(&mut self, event: CardEvent) -> Result<()> {
        match event {
            CardEvent::Scanned(card) => self.on_card(card).await,
            CardEvent::Removed => Ok(()),
        }
    }

    /// Authenticates a freshly scanned card and opens a session if it carries
    /// credit. A scan while a vend is still being reported, or a session is
    /// already open, is ignored with a status display.
    async fn on_card(&mut self, card: CardId) -> Result<()> {
        if self.in_flight.load(Ordering::Acquire) || self.session.is_some() {
            self.push_display("Bitte warten", "Vorgang läuft", Duration::from_secs(2)).await;
            return Ok(());
        }

        match self.providers.authenticate(&card).await {
            Ok(Some(info)) if info.credits > 0 => {
                info!(card = %card, credits = info.credits, "session opened");
                self.push_display(&format!("Hallo {}", info.label), &format!("Guthaben: {}", info.credits), Duration::from_secs(3))
                    .await;
                self.session = Some(Session {
                    card,
                    user_label: info.label,
                    credits_remaining: info.credits,
                    opened_at: Instant::now(),
                    provider_tag: info.provider_tag,
                });
                self.open_session.store(true, Ordering::Release);
            }
            Ok(Some(_)) => {
                self.push_display("Kein Guthaben", "", Duration::from_secs(3)).await;
            }
            Ok(None) => {
                self.push_display("Legi/Benutzer", "unbekannt", Duration::from_secs(3)).await;
            }
            Err(e) => {
                warn!(error = %e, card = %card, "identity lookup failed");
                self.push_display("Fehler", "Bitte erneut", Duration::from_secs(3)).await;
            }
        }
        Ok(())
    }

    async fn push_display(&self, top: &str, bottom: &str, duration: Duration) {
        let _ = self
            .display_tx
            .send(DisplayRequest::new(top, bottom, duration).priority(true))
            .await;
    }
}
