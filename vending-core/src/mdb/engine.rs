//! Drives the serial link against the MDB state machine in [`super::state`].
//!
//! The engine never touches identity or session policy directly; it asks the
//! orchestrator over [`EngineRequest`]/one-shot pairs and otherwise only knows
//! about bytes on the wire. This mirrors the channel-mediated split used
//! elsewhere in this codebase to keep the transport loop free of shared-state
//! locking.

use crate::constants::SESSION_IDLE_TIMEOUT;
use crate::error::{Result, VendError};
use crate::mdb::command::MdbCommand;
use crate::mdb::display::{DisplayQueue, DisplayRequest};
use crate::mdb::frame::{encode_frame, read_incoming, Incoming};
use crate::mdb::state::{reply, MdbState, SessionSubstate};
use crate::session::EngineRequest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

fn default_idle_display() -> DisplayRequest {
    DisplayRequest::new("VCS Automat", "Karte auflegen", Duration::from_secs(5))
}

fn farewell_display() -> DisplayRequest {
    DisplayRequest::new("Danke!", "Bis bald", Duration::from_secs(3)).priority(true)
}

/// The running peripheral. `T` is the serial transport; production code uses
/// `tokio_serial::SerialStream`, tests use an in-memory duplex pipe.
pub struct MdbEngine<T> {
    port: T,
    state: MdbState,
    session_start: Option<Instant>,
    pending_slot: Option<u16>,
    display_queue: DisplayQueue,
    shutting_down: bool,
    should_stop: bool,
    open_session: Arc<AtomicBool>,
    to_orchestrator: mpsc::Sender<EngineRequest>,
    display_rx: mpsc::Receiver<DisplayRequest>,
    shutdown: watch::Receiver<bool>,
}

impl<T> MdbEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        port: T,
        open_session: Arc<AtomicBool>,
        to_orchestrator: mpsc::Sender<EngineRequest>,
        display_rx: mpsc::Receiver<DisplayRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            port,
            state: MdbState::Reset,
            session_start: None,
            pending_slot: None,
            display_queue: DisplayQueue::new(),
            shutting_down: false,
            should_stop: false,
            open_session,
            to_orchestrator,
            display_rx,
            shutdown,
        }
    }

    /// Runs the poll/reply loop until a graceful shutdown completes or the
    /// transport fails unrecoverably.
    pub async fn run(&mut self) -> Result<()> {
        info!("MDB engine starting in state {}", self.state);
        loop {
            if *self.shutdown.borrow() {
                self.shutting_down = true;
            }

            while let Ok(req) = self.display_rx.try_recv() {
                self.display_queue.push(req, Instant::now());
            }

            match read_incoming(&mut self.port).await {
                Ok(None) => continue,
                Ok(Some(Incoming::Ack)) => {
                    trace!("peer ACKed our last frame");
                }
                Ok(Some(Incoming::Nak)) => {
                    warn!("peer NAKed our last frame");
                }
                Ok(Some(Incoming::Frame(payload))) => {
                    self.write_ack().await?;
                    self.dispatch(&payload).await?;
                    if self.should_stop {
                        info!("MDB engine shutting down after JUST_RESET");
                        return Ok(());
                    }
                }
                Err(e @ VendError::Framing(_)) => {
                    // A garbled byte on the wire is a fact of life on a real
                    // MDB bus; reply NAK and keep polling rather than killing
                    // the whole engine task over one bad frame.
                    warn!(error = %e, "framing error, sending NAK and continuing");
                    self.port.write_all(&[crate::constants::MDB2PC_NAK]).await?;
                }
                Err(e) => {
                    warn!(error = %e, "serial read error");
                    return Err(e);
                }
            }
        }
    }

    async fn write_ack(&mut self) -> Result<()> {
        self.port.write_all(&[crate::constants::MDB2PC_ACK]).await?;
        Ok(())
    }

    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let framed = encode_frame(payload);
        self.port.write_all(&framed).await?;
        Ok(())
    }

    async fn query_credit(&mut self) -> Result<u32> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_orchestrator
            .send(EngineRequest::CreditQuery { reply: reply_tx })
            .await
            .map_err(|_| VendError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VendError::ChannelClosed)
    }

    async fn notify_dispense(&mut self, slot: u16) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_orchestrator
            .send(EngineRequest::DispenseAck { slot, reply: reply_tx })
            .await
            .map_err(|_| VendError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VendError::ChannelClosed)
    }

    async fn dispatch(&mut self, payload: &[u8]) -> Result<()> {
        let cmd = MdbCommand::parse(payload);
        debug!(state = %self.state, command = ?cmd, "dispatching MDB command");

        if self.shutting_down && matches!(cmd, MdbCommand::Poll) {
            self.send_frame(&reply::JUST_RESET).await?;
            self.should_stop = true;
            return Ok(());
        }

        // RESET and the configuration commands are answered the same way
        // regardless of current state: the worked cold-start sequence sends
        // SETUP CONFIG and READER ENABLE while the engine is still sitting in
        // RESET, and expects their normal replies there.
        match cmd {
            MdbCommand::Reset => {
                self.send_frame(&[]).await?;
                self.state = MdbState::Reset;
                self.session_start = None;
                return Ok(());
            }
            MdbCommand::SetupConfig => {
                self.send_frame(&reply::READER_CONFIG_RESPONSE).await?;
                return Ok(());
            }
            MdbCommand::MinMaxPrices => {
                self.send_frame(&[]).await?;
                return Ok(());
            }
            MdbCommand::ReaderEnable => {
                self.send_frame(&[]).await?;
                self.state = MdbState::Enabled;
                return Ok(());
            }
            MdbCommand::ExtFeatures => {
                self.send_frame(&reply::EXT_FEATURES_RESPONSE).await?;
                return Ok(());
            }
            _ => {}
        }

        match self.state {
            MdbState::Reset => self.dispatch_reset(cmd, payload).await,
            MdbState::Disabled => self.dispatch_disabled(cmd, payload).await,
            MdbState::Enabled => self.dispatch_enabled(cmd, payload).await,
            MdbState::Session(sub) => self.dispatch_session(sub, cmd, payload).await,
        }
    }

    /// Logs the rejected command (per the error table's `UnexpectedCommand`
    /// kind) and replies OUT_OF_SEQUENCE; the engine keeps running.
    async fn reject_unexpected(&mut self, command_debug: &str, payload: &[u8]) -> Result<()> {
        let err = VendError::UnexpectedCommand {
            state: self.state.to_string(),
            command: payload.to_vec(),
        };
        warn!(error = %err, command = command_debug, "rejecting out-of-sequence command");
        self.send_frame(&reply::OUT_OF_SEQUENCE).await
    }

    async fn dispatch_reset(&mut self, cmd: MdbCommand, payload: &[u8]) -> Result<()> {
        match cmd {
            MdbCommand::Poll => {
                self.send_frame(&reply::JUST_RESET).await?;
                self.state = MdbState::Disabled;
            }
            other => self.reject_unexpected(&format!("{other:?}"), payload).await?,
        }
        Ok(())
    }

    async fn dispatch_disabled(&mut self, cmd: MdbCommand, payload: &[u8]) -> Result<()> {
        match cmd {
            MdbCommand::Poll => self.send_frame(&[]).await?,
            other => self.reject_unexpected(&format!("{other:?}"), payload).await?,
        }
        Ok(())
    }

    async fn dispatch_enabled(&mut self, cmd: MdbCommand, payload: &[u8]) -> Result<()> {
        match cmd {
            MdbCommand::Poll => {
                if self.open_session.swap(false, Ordering::AcqRel) {
                    self.session_start = Some(Instant::now());
                    self.send_frame(&reply::OPEN_SESSION).await?;
                    self.state = MdbState::Session(SessionSubstate::Idle);
                } else {
                    let now = Instant::now();
                    let req = self.display_queue.pop_ready(now).unwrap_or_else(default_idle_display);
                    self.send_frame(&req.encode()).await?;
                }
            }
            other => self.reject_unexpected(&format!("{other:?}"), payload).await?,
        }
        Ok(())
    }

    async fn dispatch_session(&mut self, sub: SessionSubstate, cmd: MdbCommand, payload: &[u8]) -> Result<()> {
        let cmd_debug = format!("{cmd:?}");
        match (sub, cmd) {
            (SessionSubstate::Idle, MdbCommand::Poll) => {
                let timed_out = self
                    .session_start
                    .map(|t| t.elapsed() > SESSION_IDLE_TIMEOUT)
                    .unwrap_or(false);
                if timed_out {
                    self.send_frame(&reply::CANCEL_REQUEST).await?;
                    self.state = MdbState::Session(SessionSubstate::SessionEnd);
                } else {
                    let now = Instant::now();
                    let req = self
                        .display_queue
                        .pop_ready(now)
                        .unwrap_or_else(|| DisplayRequest::new("Bon Appetit!", "", Duration::from_secs(2)));
                    self.send_frame(&req.encode()).await?;
                }
            }
            (SessionSubstate::Idle, MdbCommand::VendRequest { slot }) => {
                let credits = self.query_credit().await?;
                if credits > 0 {
                    self.send_frame(&reply::VEND_APPROVED).await?;
                    self.state = MdbState::Session(SessionSubstate::VendApproved);
                    self.pending_slot = Some(slot);
                } else {
                    self.send_frame(&reply::VEND_DENIED).await?;
                    self.state = MdbState::Session(SessionSubstate::VendCancel);
                }
            }
            (SessionSubstate::Idle, MdbCommand::VendCancel) => {
                self.send_frame(&reply::CANCEL_REQUEST).await?;
                self.state = MdbState::Session(SessionSubstate::SessionEnd);
            }
            (SessionSubstate::Idle, MdbCommand::SessionComplete) => {
                self.send_frame(&[]).await?;
                self.state = MdbState::Session(SessionSubstate::SessionEnd);
            }
            (SessionSubstate::VendApproved, MdbCommand::Poll) => {
                self.send_frame(&[]).await?;
            }
            (SessionSubstate::VendApproved, MdbCommand::VendSuccess) => {
                if let Some(slot) = self.pending_slot.take() {
                    self.notify_dispense(slot).await?;
                }
                self.send_frame(&[]).await?;
                self.state = MdbState::Session(SessionSubstate::SessionCancel);
            }
            (SessionSubstate::VendApproved, MdbCommand::VendCancel) => {
                self.send_frame(&reply::CANCEL_REQUEST).await?;
                self.state = MdbState::Session(SessionSubstate::SessionEnd);
            }
            (SessionSubstate::VendCancel, MdbCommand::Poll)
            | (SessionSubstate::VendCancel, MdbCommand::VendCancel)
            | (SessionSubstate::SessionCancel, MdbCommand::Poll) => {
                self.send_frame(&reply::CANCEL_REQUEST).await?;
                self.state = MdbState::Session(SessionSubstate::SessionEnd);
            }
            (SessionSubstate::VendCancel, MdbCommand::SessionComplete)
            | (SessionSubstate::SessionCancel, MdbCommand::SessionComplete) => {
                self.send_frame(&[]).await?;
            }
            (SessionSubstate::SessionEnd, MdbCommand::Poll) => {
                self.send_frame(&reply::END_SESSION).await?;
                self.state = MdbState::Enabled;
                self.session_start = None;
                self.display_queue.push(farewell_display(), Instant::now());
            }
            (SessionSubstate::SessionEnd, MdbCommand::SessionComplete) => {
                self.send_frame(&[]).await?;
            }
            _ => self.reject_unexpected(&cmd_debug, payload).await?,
        }
        Ok(())
    }
}
