//! In-process ledger feed backed by a broadcast channel.
//!
//! Holds the latest balance and ownership per address and fans updates out to
//! every open subscription. Each subscription first yields the current value
//! (if any) and then every later update for its address, the way a ledger
//! node's storage subscriptions behave. Used by the demo binary and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use rust_decimal::Decimal;
use tokio::sync::{Notify, RwLock, broadcast};
use tracing::{debug, info, warn};

use super::channel::{ChannelKind, LedgerChannels, SnapshotStream};
use crate::error::TransportError;
use crate::onboarding::model::{BalanceSnapshot, OwnershipSnapshot};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum LedgerEvent {
    Balance {
        address: String,
        snapshot: BalanceSnapshot,
    },
    Ownership {
        address: String,
        snapshot: OwnershipSnapshot,
    },
    /// Drop subscriptions for one address, or for all when `None`.
    Dropped {
        address: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, Default)]
struct Account {
    balance: Option<BalanceSnapshot>,
    ownership: Option<OwnershipSnapshot>,
}

/// In-memory ledger feed.
pub struct LocalLedger {
    accounts: RwLock<HashMap<String, Account>>,
    tx: broadcast::Sender<LedgerEvent>,
    connected: AtomicBool,
    reconnect: Notify,
}

impl LocalLedger {
    /// Create a connected, empty feed.
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            accounts: RwLock::new(HashMap::new()),
            tx,
            connected: AtomicBool::new(true),
            reconnect: Notify::new(),
        })
    }

    /// Set the free balance of `address` and notify its subscribers.
    pub async fn set_balance(&self, address: &str, free_balance: Decimal, block: Option<u64>) {
        let snapshot = BalanceSnapshot {
            free_balance,
            block,
        };
        self.publish_balance(address, snapshot).await;
    }

    /// Set how many spaces `address` owns and notify its subscribers.
    pub async fn set_space_count(&self, address: &str, count: u32, block: Option<u64>) {
        let snapshot = OwnershipSnapshot {
            owns_at_least_one_space: count > 0,
            block,
        };
        self.publish_ownership(address, snapshot).await;
    }

    /// Publish a balance snapshot as-is (including stale block numbers).
    pub async fn publish_balance(&self, address: &str, snapshot: BalanceSnapshot) {
        debug!(address = %address, balance = %snapshot.free_balance, block = ?snapshot.block, "Balance update");
        {
            let mut accounts = self.accounts.write().await;
            accounts.entry(address.to_string()).or_default().balance = Some(snapshot.clone());
        }
        // ok if no subscriber is listening
        let _ = self.tx.send(LedgerEvent::Balance {
            address: address.to_string(),
            snapshot,
        });
    }

    /// Publish an ownership snapshot as-is.
    pub async fn publish_ownership(&self, address: &str, snapshot: OwnershipSnapshot) {
        debug!(address = %address, owns = snapshot.owns_at_least_one_space, block = ?snapshot.block, "Ownership update");
        {
            let mut accounts = self.accounts.write().await;
            accounts.entry(address.to_string()).or_default().ownership = Some(snapshot.clone());
        }
        let _ = self.tx.send(LedgerEvent::Ownership {
            address: address.to_string(),
            snapshot,
        });
    }

    /// Fail every open subscription for `address` with a transport error.
    /// The feed stays connected, so subscribing again succeeds.
    pub fn drop_subscriptions(&self, address: &str) {
        warn!(address = %address, "Dropping ledger subscriptions");
        let _ = self.tx.send(LedgerEvent::Dropped {
            address: Some(address.to_string()),
            reason: "subscription dropped by node".to_string(),
        });
    }

    /// Simulate losing the node: open subscriptions fail and new ones are
    /// refused until [`LocalLedger::reconnect`].
    pub fn disconnect(&self) {
        warn!("Ledger feed disconnected");
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.tx.send(LedgerEvent::Dropped {
            address: None,
            reason: "connection lost".to_string(),
        });
    }

    /// Restore the connection and wake everyone waiting in `reconnected()`.
    pub fn reconnect(&self) {
        info!("Ledger feed reconnected");
        self.connected.store(true, Ordering::SeqCst);
        self.reconnect.notify_waiters();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions across all addresses.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn ensure_connected(&self, channel: ChannelKind, address: &str) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::SubscribeFailed {
                channel,
                address: address.to_string(),
                reason: "ledger feed disconnected".to_string(),
            })
        }
    }
}

/// Build a subscription stream: the current value, then matching updates
/// until the subscription is dropped or the feed closes.
fn live_stream<T, F>(
    rx: broadcast::Receiver<LedgerEvent>,
    initial: Option<T>,
    address: String,
    channel: ChannelKind,
    select: F,
) -> SnapshotStream<T>
where
    T: Send + 'static,
    F: Fn(&LedgerEvent, &str) -> Option<T> + Send + 'static,
{
    let updates = stream::unfold(
        (rx, address, select, false),
        move |(mut rx, address, select, failed)| async move {
            if failed {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(LedgerEvent::Dropped {
                        address: target,
                        reason,
                    }) => {
                        if target.as_deref().is_none_or(|t| t == address) {
                            let err = TransportError::Dropped {
                                channel,
                                address: address.clone(),
                                reason,
                            };
                            return Some((Err(err), (rx, address, select, true)));
                        }
                    }
                    Ok(event) => {
                        if let Some(snapshot) = select(&event, &address) {
                            return Some((Ok(snapshot), (rx, address, select, false)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, channel = %channel, "Ledger subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    Box::pin(stream::iter(initial.map(Ok)).chain(updates))
}

#[async_trait]
impl LedgerChannels for LocalLedger {
    fn name(&self) -> &str {
        "local"
    }

    async fn subscribe_balance(
        &self,
        address: &str,
    ) -> Result<SnapshotStream<BalanceSnapshot>, TransportError> {
        self.ensure_connected(ChannelKind::Balance, address)?;
        // Subscribe before reading the current value so no update falls in between.
        let rx = self.tx.subscribe();
        let initial = self
            .accounts
            .read()
            .await
            .get(address)
            .and_then(|a| a.balance.clone());
        Ok(live_stream(
            rx,
            initial,
            address.to_string(),
            ChannelKind::Balance,
            |event, address| match event {
                LedgerEvent::Balance {
                    address: a,
                    snapshot,
                } if a == address => Some(snapshot.clone()),
                _ => None,
            },
        ))
    }

    async fn subscribe_ownership(
        &self,
        address: &str,
    ) -> Result<SnapshotStream<OwnershipSnapshot>, TransportError> {
        self.ensure_connected(ChannelKind::Ownership, address)?;
        let rx = self.tx.subscribe();
        let initial = self
            .accounts
            .read()
            .await
            .get(address)
            .and_then(|a| a.ownership.clone());
        Ok(live_stream(
            rx,
            initial,
            address.to_string(),
            ChannelKind::Ownership,
            |event, address| match event {
                LedgerEvent::Ownership {
                    address: a,
                    snapshot,
                } if a == address => Some(snapshot.clone()),
                _ => None,
            },
        ))
    }

    async fn reconnected(&self) {
        loop {
            // Register before checking so a reconnect in between is not missed.
            let notified = self.reconnect.notified();
            if self.is_connected() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn subscription_yields_current_then_updates() {
        let ledger = LocalLedger::new();
        ledger.set_balance("alice", dec!(0), Some(1)).await;

        let mut stream = ledger.subscribe_balance("alice").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        ledger.set_balance("bob", dec!(9), None).await;
        ledger.set_balance("alice", dec!(500), Some(2)).await;

        let next = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(next.free_balance, dec!(500));
        assert_eq!(next.block, Some(2));
    }

    #[tokio::test]
    async fn unknown_account_waits_for_first_update() {
        let ledger = LocalLedger::new();
        let mut stream = ledger.subscribe_ownership("carol").await.unwrap();

        ledger.set_space_count("carol", 2, None).await;
        let snap = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
        assert!(snap.owns_at_least_one_space);
    }

    #[tokio::test]
    async fn dropped_subscription_errors_then_ends() {
        let ledger = LocalLedger::new();
        let mut alice = ledger.subscribe_balance("alice").await.unwrap();
        let mut bob = ledger.subscribe_balance("bob").await.unwrap();

        ledger.drop_subscriptions("alice");
        ledger.set_balance("bob", dec!(1), None).await;

        let err = timeout(WAIT, alice.next()).await.unwrap().unwrap();
        assert!(matches!(err, Err(TransportError::Dropped { channel: ChannelKind::Balance, .. })));
        assert!(timeout(WAIT, alice.next()).await.unwrap().is_none());

        // bob's subscription is unaffected
        let snap = timeout(WAIT, bob.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(snap.free_balance, dec!(1));
    }

    #[tokio::test]
    async fn disconnected_feed_refuses_subscriptions() {
        let ledger = LocalLedger::new();
        ledger.disconnect();

        let err = ledger.subscribe_ownership("alice").await.err().unwrap();
        assert!(matches!(err, TransportError::SubscribeFailed { .. }));

        ledger.reconnect();
        assert!(ledger.subscribe_ownership("alice").await.is_ok());
    }

    #[tokio::test]
    async fn reconnected_resolves_after_reconnect() {
        let ledger = LocalLedger::new();
        // Connected: returns immediately.
        timeout(WAIT, ledger.reconnected()).await.unwrap();

        ledger.disconnect();
        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.reconnected().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ledger.reconnect();
        timeout(WAIT, waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let ledger = LocalLedger::new();
        let stream = ledger.subscribe_balance("alice").await.unwrap();
        assert_eq!(ledger.subscriber_count(), 1);
        drop(stream);
        assert_eq!(ledger.subscriber_count(), 0);
    }
}
