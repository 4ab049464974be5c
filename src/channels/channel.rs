//! Ledger channel abstraction: live balance and space-ownership subscriptions.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::onboarding::model::{BalanceSnapshot, OwnershipSnapshot};

/// A live stream of snapshots. Dropping it unsubscribes.
pub type SnapshotStream<T> = Pin<Box<dyn Stream<Item = Result<T, TransportError>> + Send>>;

/// Which observation a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Balance,
    Ownership,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Balance => write!(f, "balance"),
            Self::Ownership => write!(f, "ownership"),
        }
    }
}

/// Source of ledger observations for an address.
///
/// Implementations own the transport (and its backoff); the engine only
/// subscribes, and after a failure waits on [`LedgerChannels::reconnected`]
/// before subscribing again.
#[async_trait]
pub trait LedgerChannels: Send + Sync {
    /// Get the feed name (for logging).
    fn name(&self) -> &str;

    /// Subscribe to balance updates for `address`.
    async fn subscribe_balance(
        &self,
        address: &str,
    ) -> Result<SnapshotStream<BalanceSnapshot>, TransportError>;

    /// Subscribe to space-ownership updates for `address`.
    async fn subscribe_ownership(
        &self,
        address: &str,
    ) -> Result<SnapshotStream<OwnershipSnapshot>, TransportError>;

    /// Resolve once the transport is usable again.
    async fn reconnected(&self);
}
