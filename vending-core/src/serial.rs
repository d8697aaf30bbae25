//! Opens the physical serial link to the MDB-to-RS232 adapter.

use crate::error::{Result, VendError};
use std::io;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Opens `path` at `baud_rate` as a non-blocking tokio transport. The MDB
/// engine only needs `AsyncRead + AsyncWrite`, so any transport implementing
/// those traits (this, or an in-memory duplex pipe in tests) works.
pub fn open(path: &str, baud_rate: u32) -> Result<SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| VendError::SerialIo(io::Error::from(e)))?;
    Ok(port)
}
