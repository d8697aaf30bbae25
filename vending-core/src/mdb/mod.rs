//! The MDB2PC cashless-peripheral protocol engine.

pub mod command;
pub mod display;
pub mod engine;
pub mod frame;
pub mod state;

pub use command::MdbCommand;
pub use display::{DisplayQueue, DisplayRequest};
pub use engine::MdbEngine;
pub use state::{MdbState, SessionSubstate};
