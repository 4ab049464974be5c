//! In-memory completion store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::CompletionStore;
use crate::error::DatabaseError;

/// Completion store kept in process memory.
///
/// Counts writes and can be told to fail them, so callers can be checked
/// for write-once and best-effort behaviour.
#[derive(Default)]
pub struct MemoryCompletionStore {
    addresses: RwLock<Vec<String>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already knows `addresses`.
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for address in addresses {
            let address = address.into();
            if !list.contains(&address) {
                list.push(address);
            }
        }
        Self {
            addresses: RwLock::new(list),
            ..Default::default()
        }
    }

    /// Number of `set` calls that reached the store (including no-op repeats).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent `set` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionStore for MemoryCompletionStore {
    async fn has(&self, address: &str) -> Result<bool, DatabaseError> {
        Ok(self.addresses.read().await.iter().any(|a| a == address))
    }

    async fn set(&self, address: &str) -> Result<(), DatabaseError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("simulated write failure".to_string()));
        }
        let mut addresses = self.addresses.write().await;
        if !addresses.iter().any(|a| a == address) {
            addresses.push(address.to_string());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.addresses.read().await.clone())
    }
}
