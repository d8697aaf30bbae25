//! The card-reader driver contract. The physical NFC reader is out of scope
//! for this crate; [`StdinCardReader`] exists only so the orchestrator has a
//! concrete source of events to run against without real hardware.

use crate::error::Result;
use crate::session::CardId;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

/// A card reaching or leaving the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    Scanned(CardId),
    Removed,
}

#[async_trait]
pub trait CardReader: Send {
    /// Blocks until the next card event; returns `Err` only on a driver
    /// failure the orchestrator cannot recover from.
    async fn next_event(&mut self) -> Result<CardEvent>;
}

/// Reads whitespace-trimmed card UIDs from stdin, one per line. Used in place
/// of the real NFC driver for local development and integration testing.
pub struct StdinCardReader {
    lines: BufReader<Stdin>,
}

impl StdinCardReader {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for StdinCardReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardReader for StdinCardReader {
    async fn next_event(&mut self) -> Result<CardEvent> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.lines.read_line(&mut line).await?;
            if n == 0 {
                std::future::pending::<()>().await;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(CardEvent::Scanned(CardId(trimmed.to_string())));
            }
        }
    }
}
