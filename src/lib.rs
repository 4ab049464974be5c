//! Space onboarding: step progression driven by live ledger data.

pub mod channels;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod repl;
pub mod store;
