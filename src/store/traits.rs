//! `CompletionStore` trait: durable record of onboarded addresses.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// Backend-agnostic record of which addresses have finished onboarding.
///
/// Append-only from the engine's side. `set` on an address that is already
/// present must succeed without adding a duplicate.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Whether `address` has completed onboarding.
    async fn has(&self, address: &str) -> Result<bool, DatabaseError>;

    /// Record `address` as onboarded. Idempotent.
    async fn set(&self, address: &str) -> Result<(), DatabaseError>;

    /// All recorded addresses, in insertion order.
    async fn list(&self) -> Result<Vec<String>, DatabaseError>;
}
