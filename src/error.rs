//! Error types for space onboarding.

use crate::channels::ChannelKind;
use crate::onboarding::state::Step;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Completion store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Ledger subscription errors.
///
/// Never surfaced to consumers directly: the engine maps them onto
/// `StepStatus::Unknown` and waits for the transport to reconnect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to subscribe to {channel} for {address}: {reason}")]
    SubscribeFailed {
        channel: ChannelKind,
        address: String,
        reason: String,
    },

    #[error("{channel} subscription for {address} dropped: {reason}")]
    Dropped {
        channel: ChannelKind,
        address: String,
        reason: String,
    },
}

/// Errors returned by the engine's mutators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnboardingError {
    #[error("Cannot advance onboarding from {from} to {to}")]
    InvalidTransition { from: Step, to: Step },

    #[error("Onboarding engine has been disposed")]
    Disposed,
}

/// Errors parsing a demo console command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("{command} requires <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Invalid {argument}: {value}")]
    InvalidArgument {
        argument: &'static str,
        value: String,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
