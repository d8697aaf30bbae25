//! Protocol engine and session orchestration for a student-association
//! cashless vending machine: an MDB2PC peripheral link on one side, an
//! HMAC-signed identity directory on the other.

pub mod cardreader;
pub mod config;
pub mod constants;
pub mod error;
pub mod mdb;
pub mod orchestrator;
pub mod provider;
pub mod report;
pub mod serial;
pub mod session;

pub use error::{Result, VendError};
