//! MDB2PC byte-level framing: `0x02 0x00 <payload> 0x10 0x03`, with single-byte
//! `0x06`/`0x15` control responses interleaved on the wire.

use crate::constants::{
    MDB2PC_ACK, MDB2PC_FRAME_ADDR, MDB2PC_FRAME_START, MDB2PC_FRAME_STOP, MDB2PC_NAK,
    SERIAL_POLL_TIMEOUT,
};
use crate::error::{Result, VendError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// One unit of data read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Ack,
    Nak,
    Frame(Vec<u8>),
}

/// Wraps `payload` in the MDB2PC frame envelope.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 4);
    buf.push(MDB2PC_FRAME_START);
    buf.push(MDB2PC_FRAME_ADDR);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&MDB2PC_FRAME_STOP);
    buf
}

/// Extracts the payload from a complete framed buffer, returning the payload
/// and the number of bytes consumed. Used by the roundtrip tests; the live
/// engine reads byte-by-byte via [`read_incoming`] instead.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize)> {
    if bytes.len() < 4 {
        return Err(VendError::Framing("frame shorter than envelope".into()));
    }
    if bytes[0] != MDB2PC_FRAME_START || bytes[1] != MDB2PC_FRAME_ADDR {
        return Err(VendError::Framing("missing frame start/address bytes".into()));
    }
    let stop_offset = bytes[2..]
        .windows(2)
        .position(|w| w == MDB2PC_FRAME_STOP)
        .ok_or_else(|| VendError::Framing("frame stop sequence not found".into()))?;
    let payload = &bytes[2..2 + stop_offset];
    Ok((payload, 2 + stop_offset + 2))
}

/// Reads the next unit off `reader`: a control byte, a full frame, or `None`
/// if no byte arrived within [`SERIAL_POLL_TIMEOUT`] (the normal idle case
/// between polls).
pub async fn read_incoming<R>(reader: &mut R) -> Result<Option<Incoming>>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match timeout(SERIAL_POLL_TIMEOUT, reader.read_exact(&mut byte)).await {
        Err(_elapsed) => return Ok(None),
        Ok(Err(e)) => return Err(VendError::SerialIo(e)),
        Ok(Ok(_)) => {}
    }

    match byte[0] {
        MDB2PC_ACK => Ok(Some(Incoming::Ack)),
        MDB2PC_NAK => Ok(Some(Incoming::Nak)),
        MDB2PC_FRAME_START => {
            let mut addr = [0u8; 1];
            reader.read_exact(&mut addr).await?;
            if addr[0] != MDB2PC_FRAME_ADDR {
                return Err(VendError::Framing(format!(
                    "unexpected address byte {:#04x}",
                    addr[0]
                )));
            }
            let mut payload = Vec::new();
            loop {
                let mut b = [0u8; 1];
                reader.read_exact(&mut b).await?;
                payload.push(b[0]);
                let len = payload.len();
                if len >= 2 && payload[len - 2..] == MDB2PC_FRAME_STOP {
                    payload.truncate(len - 2);
                    break;
                }
            }
            Ok(Some(Incoming::Frame(payload)))
        }
        other => Err(VendError::Framing(format!(
            "unexpected leading byte {:#04x}",
            other
        ))),
    }
}
