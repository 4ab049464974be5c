//! Ledger observation channels.

pub mod channel;
pub mod local;

pub use channel::*;
pub use local::LocalLedger;
