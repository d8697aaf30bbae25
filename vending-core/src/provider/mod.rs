//! Identity providers: the HTTPS-backed student-association directory and a
//! local SQLite fallback, queried together and reconciled by credit amount.

pub mod https;
pub mod local;
pub mod nonce_store;

use crate::error::Result;
use crate::session::CardId;
use async_trait::async_trait;
use tracing::warn;

/// What a provider knows about a card once it has recognised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub label: String,
    pub credits: u32,
    /// The [`Provider::tag`] of the provider that produced this answer, kept
    /// alongside the session so a later report is sent back to the same
    /// provider that authorized it, not every configured provider.
    pub provider_tag: String,
}

/// Credit-reset schedule as reported by a provider, for the reporting/
/// telemetry surface rather than the vend path itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub last_reset: i64,
    pub next_reset: i64,
    pub standard_credits: u32,
    pub reset_interval_days: u32,
}

/// A source of truth for card identity and credit balance.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short, stable identifier for this provider (e.g. `"https"`, `"local"`),
    /// carried on `UserInfo`/`Session`/`PendingReport` so a vend outcome is
    /// reported back to the provider that actually authorized it.
    fn tag(&self) -> &str;

    /// Looks up the card. `Ok(None)` means "not known to this provider",
    /// distinct from a transport/verification error.
    async fn authenticate(&self, card: &CardId) -> Result<Option<UserInfo>>;

    /// Records the outcome of a vend attempt for this card.
    async fn report(&self, card: &CardId, slot: u16, dispensed: bool) -> Result<()>;

    /// Reports the credit-reset schedule, if this provider tracks one.
    /// Not every provider has a notion of a schedule (the local fallback
    /// directory hands out a flat allowance and never resets it), so the
    /// default implementation reports none.
    async fn info(&self) -> Result<Option<ProviderInfo>> {
        Ok(None)
    }
}

/// Queries every configured provider and keeps the highest-credit answer;
/// ties are broken by chain order (earlier provider wins).
pub struct ProviderChain {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub async fn authenticate(&self, card: &CardId) -> Result<Option<UserInfo>> {
        let mut best: Option<UserInfo> = None;
        for provider in &self.providers {
            match provider.authenticate(card).await {
                Ok(Some(info)) => {
                    let better = best.as_ref().map(|b| info.credits > b.credits).unwrap_or(true);
                    if better {
                        best = Some(info);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, card = %card, "provider lookup failed"),
            }
        }
        Ok(best)
    }

    /// Reports the outcome to the single provider named by `tag` — the one
    /// that won the authentication tie-break for this session, not every
    /// configured provider.
    pub async fn report(&self, tag: &str, card: &CardId, slot: u16, dispensed: bool) -> Result<()> {
        match self.providers.iter().find(|p| p.tag() == tag) {
            Some(provider) => {
                if let Err(e) = provider.report(card, slot, dispensed).await {
                    warn!(error = %e, card = %card, tag, "provider report failed");
                }
            }
            None => warn!(tag, card = %card, "no configured provider matches the winning tag; vend outcome not reported"),
        }
        Ok(())
    }
}
