//! Session bookkeeping shared between the MDB engine and the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::oneshot;

/// A scanned card UID, as reported by the card reader driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId(pub String);

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single active cashless session. Only one can exist at a time; a new
/// card scan while one is open is rejected by the orchestrator.
#[derive(Debug, Clone)]
pub struct Session {
    pub card: CardId,
    pub user_label: String,
    pub credits_remaining: u32,
    pub opened_at: Instant,
    /// Tag of the provider that won the authentication tie-break; the vend
    /// outcome is reported back to this provider only.
    pub provider_tag: String,
}

/// A dispensed-or-denied outcome awaiting delivery to the identity provider.
/// At most one report may be in flight; a non-empty queue gates new scans.
#[derive(Debug, Clone)]
pub struct PendingReport {
    pub card: CardId,
    pub slot: u16,
    pub dispensed: bool,
    pub provider_tag: String,
}

/// Requests the [`crate::mdb::engine::MdbEngine`] sends to the orchestrator
/// while a session is open, answered over a one-shot reply channel.
#[derive(Debug)]
pub enum EngineRequest {
    /// How many credits remain for the card behind the currently open session.
    CreditQuery { reply: oneshot::Sender<u32> },
    /// The peripheral physically vended `slot`; record it for reporting.
    DispenseAck {
        slot: u16,
        reply: oneshot::Sender<()>,
    },
}
