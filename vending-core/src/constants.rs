// Protocol constants for the MDB2PC cashless-peripheral link.

use std::time::Duration;

/// MDB2PC single-byte control responses.
pub const MDB2PC_NAK: u8 = 0x15;
pub const MDB2PC_ACK: u8 = 0x06;
pub const MDB2PC_FRAME_START: u8 = 0x02;
pub const MDB2PC_FRAME_ADDR: u8 = 0x00;
pub const MDB2PC_FRAME_STOP: [u8; 2] = [0x10, 0x03];

/// Serial read poll timeout; the engine never blocks longer than this per byte.
pub const SERIAL_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Idle timeout for SESSION.IDLE: no VEND_REQUEST within this window cancels the session.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(12);

/// A display line is always exactly this many bytes, space-padded/truncated.
pub const DISPLAY_LINE_LEN: usize = 16;

/// Clamp bounds for the encoded display duration byte (tenths of a second).
pub const DISPLAY_DURATION_MIN: u8 = 1;
pub const DISPLAY_DURATION_MAX: u8 = 250;

/// Default per-request timeout for the identity-provider HTTPS client.
pub const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Acceptable clock skew between client and server timestamps.
pub const TIMESTAMP_SKEW: i64 = 30;

/// Minimum accepted nonce length per the wire protocol.
pub const MIN_NONCE_LEN: usize = 20;
