use std::io;
use thiserror::Error;

/// The primary error type for the `vending-core` library.
#[derive(Error, Debug)]
pub enum VendError {
    #[error("serial I/O error: {0}")]
    SerialIo(#[from] io::Error),

    #[error("timeout waiting for the MDB master")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("malformed MDB2PC frame: {0}")]
    Framing(String),

    #[error("unrecognised MDB command in state {state}: {command:02x?}")]
    UnexpectedCommand { state: String, command: Vec<u8> },

    #[error("HTTPS transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response verification failed: {0}")]
    Verification(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("orchestrator channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, VendError>;
