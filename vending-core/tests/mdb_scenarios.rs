//! End-to-end MDB state-machine scenarios driven over an in-memory duplex
//! pipe, complementing `mdb::engine`'s own colocated `denied_vend_scenario`
//! test with the approved-vend and cold-start-without-a-session paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use vending_core::mdb::frame::{decode_frame, encode_frame};
use vending_core::mdb::MdbEngine;
use vending_core::session::EngineRequest;

async fn roundtrip(master: &mut (impl AsyncRead + AsyncWrite + Unpin), payload: &[u8]) -> Vec<u8> {
    master.write_all(&encode_frame(payload)).await.unwrap();
    let mut ack = [0u8; 1];
    master.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], vending_core::constants::MDB2PC_ACK);

    let mut buf = vec![0u8; 512];
    let n = master.read(&mut buf).await.unwrap();
    let (reply, _) = decode_frame(&buf[..n]).unwrap();
    reply.to_vec()
}

/// Cold start through SETUP CONFIG / READER ENABLE while still in RESET,
/// mirroring the config-commands-are-state-independent resolution recorded
/// in DESIGN.md.
#[tokio::test]
async fn cold_start_accepts_config_commands_before_reader_enable() {
    let (master, slave) = duplex(1024);
    let open_session = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::channel(8);
    let (_display_tx, display_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut engine = MdbEngine::new(slave, open_session, tx, display_rx, shutdown_rx);
    tokio::spawn(async move {
        let _ = engine.run().await;
    });
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let mut master = master;
    // POLL while still fresh: JUST_RESET, then transition to DISABLED.
    assert_eq!(roundtrip(&mut master, &[0x12]).await, vec![0x00]);
    // SETUP CONFIG answered even though we're not in DISABLED/ENABLED yet.
    let setup_config = [0x11, 0x00, 0x03, 0x10, 0x10, 0x02, 0x01];
    assert_eq!(
        roundtrip(&mut master, &setup_config).await,
        vec![0x01, 0x01, 0x02, 0xF4, 0x01, 0x02, 0x02, 0x00]
    );
    // READER ENABLE moves us straight to ENABLED.
    assert_eq!(roundtrip(&mut master, &[0x14, 0x01]).await, Vec::<u8>::new());
    // A POLL now gets the idle display frame rather than OUT_OF_SEQUENCE.
    let idle_reply = roundtrip(&mut master, &[0x12]).await;
    assert_eq!(idle_reply[0], 0x02, "expected a DISPLAY REQUEST opcode while enabled and idle");
}

/// A full approved vend: session opens, VEND_REQUEST gets approved, VEND
/// SUCCESS triggers a dispense notification to the orchestrator, and the
/// session closes out through SESSION_CANCEL / SESSION_END.
#[tokio::test]
async fn approved_vend_notifies_orchestrator_and_closes_session() {
    let (master, slave) = duplex(1024);
    let open_session = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::channel(8);
    let (_display_tx, display_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut engine = MdbEngine::new(slave, open_session.clone(), tx, display_rx, shutdown_rx);
    tokio::spawn(async move {
        let _ = engine.run().await;
    });

    let (dispensed_tx, dispensed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let mut dispensed_tx = Some(dispensed_tx);
        while let Some(req) = rx.recv().await {
            match req {
                EngineRequest::CreditQuery { reply } => {
                    let _ = reply.send(3);
                }
                EngineRequest::DispenseAck { slot, reply } => {
                    if let Some(tx) = dispensed_tx.take() {
                        let _ = tx.send(slot);
                    }
                    let _ = reply.send(());
                }
            }
        }
    });

    let mut master = master;
    assert_eq!(roundtrip(&mut master, &[0x12]).await, vec![0x00]);
    assert_eq!(roundtrip(&mut master, &[0x14, 0x01]).await, Vec::<u8>::new());

    open_session.store(true, Ordering::Release);
    assert_eq!(roundtrip(&mut master, &[0x12]).await, vec![0x03, 0xFF, 0xFF]);

    let vend_request = [0x13, 0x00, 0x00, 0x00, 0x00, 0x07];
    assert_eq!(roundtrip(&mut master, &vend_request).await, vec![0x05, 0xFF, 0xFF]);

    assert_eq!(roundtrip(&mut master, &[0x13, 0x02]).await, Vec::<u8>::new());
    let dispensed_slot = dispensed_rx.await.unwrap();
    assert_eq!(dispensed_slot, 7);

    assert_eq!(roundtrip(&mut master, &[0x12]).await, vec![0x04]);
    assert_eq!(roundtrip(&mut master, &[0x12]).await, vec![0x07]);
}
