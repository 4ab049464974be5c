//! OnboardingEngine: owns the ledger subscriptions for the active identity
//! and keeps the published onboarding state in step with them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::{ChannelEvent, Effect, EngineCore};
use super::model::{EngineState, Identity};
use super::state::Step;
use crate::channels::{ChannelKind, LedgerChannels};
use crate::config::OnboardingConfig;
use crate::error::{OnboardingError, TransportError};
use crate::store::CompletionStore;

type EventStream = BoxStream<'static, Result<ChannelEvent, TransportError>>;

/// Live onboarding state for whichever account is selected.
///
/// Every subscription task captures the epoch it was spawned under and
/// checks it under the core lock before touching state, so tasks from a
/// previous identity (or from before `dispose`) can never leak snapshots
/// into the current state, even if their abort has not landed yet.
pub struct OnboardingEngine {
    shared: Arc<Shared>,
}

struct Shared {
    config: OnboardingConfig,
    ledger: Arc<dyn LedgerChannels>,
    store: Arc<dyn CompletionStore>,
    core: Mutex<EngineCore>,
    state_tx: watch::Sender<EngineState>,
    route_tx: watch::Sender<Option<String>>,
    /// Subscription tasks of the current epoch. Lock before `core`.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OnboardingEngine {
    pub fn new(
        config: OnboardingConfig,
        ledger: Arc<dyn LedgerChannels>,
        store: Arc<dyn CompletionStore>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(EngineState::default());
        let (route_tx, _rx) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                ledger,
                store,
                core: Mutex::new(EngineCore::new()),
                state_tx,
                route_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Initialize for `identity` and open its subscriptions.
    ///
    /// The returned state is well-defined before any snapshot arrives. Does
    /// nothing once the engine is disposed.
    pub async fn start(&self, identity: Identity) -> EngineState {
        self.shared.switch(identity, true).await;
        self.state()
    }

    /// Re-target the engine at a new identity.
    ///
    /// Tears down the previous subscriptions before opening new ones. No-op if
    /// the identity is unchanged.
    pub async fn on_identity_change(&self, next: Identity) {
        self.shared.switch(next, false).await;
    }

    /// Unsubscribe everything. Safe to call more than once.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// Current state as seen from the active route.
    pub fn state(&self) -> EngineState {
        let state = self.shared.state_tx.borrow().clone();
        match self.shared.route_tx.borrow().as_deref() {
            Some(route) => state.for_route(route, &self.shared.config.getting_started_path),
            None => state,
        }
    }

    /// Watch raw state changes (no route override applied).
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    /// Record the route the consumer is showing.
    pub fn set_route(&self, route: impl Into<String>) {
        let route = route.into();
        debug!(route = %route, "Route changed");
        self.shared.route_tx.send_replace(Some(route));
    }

    pub fn getting_started_path(&self) -> &str {
        &self.shared.config.getting_started_path
    }

    pub fn set_aux_action(&self, value: bool) -> Result<(), OnboardingError> {
        let mut core = self.shared.core();
        core.set_aux_action(value)?;
        self.shared.publish(&core);
        Ok(())
    }

    /// Manually advance the displayed step to the next one.
    pub fn advance_step(&self, step: Step) -> Result<Step, OnboardingError> {
        let mut core = self.shared.core();
        let step = core.advance_step(step)?;
        info!(step = %step, "Onboarding step advanced manually");
        self.shared.publish(&core);
        Ok(step)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.core().is_disposed()
    }
}

impl Drop for OnboardingEngine {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &EngineCore) {
        self.state_tx.send_replace(core.state().clone());
    }

    async fn switch(self: &Arc<Self>, identity: Identity, force: bool) {
        // Claimed before the store lookup; a `dispose` or a newer switch
        // during the await supersedes it.
        let ticket = {
            let mut core = self.core();
            core.begin_switch(&identity, force)
        };
        let Some(ticket) = ticket else {
            return;
        };

        let already_completed = match identity.active_address() {
            Some(address) => self.is_completed(address).await,
            None => false,
        };

        let mut tasks = self.tasks();
        let epoch = {
            let mut core = self.core();
            let Some(epoch) = core.finish_switch(ticket, identity.clone(), already_completed)
            else {
                return;
            };
            self.publish(&core);
            epoch
        };
        for handle in tasks.drain(..) {
            handle.abort();
        }

        match identity.active_address() {
            Some(address) => {
                info!(
                    address = %address,
                    epoch,
                    already_completed,
                    "Onboarding tracking account"
                );
                tasks.push(self.spawn_subscription(epoch, address.to_string(), ChannelKind::Balance));
            }
            None => info!(epoch, "Onboarding tracking logged-out session"),
        }
    }

    fn dispose(&self) {
        let mut tasks = self.tasks();
        {
            let mut core = self.core();
            if core.is_disposed() {
                return;
            }
            core.dispose();
        }
        for handle in tasks.drain(..) {
            handle.abort();
        }
        debug!("Onboarding engine disposed");
    }

    /// Seed lookup. A failing store counts as "not onboarded yet".
    async fn is_completed(&self, address: &str) -> bool {
        match self.store.has(address).await {
            Ok(done) => done,
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to read completion store");
                false
            }
        }
    }

    fn spawn_subscription(
        self: &Arc<Self>,
        epoch: u64,
        address: String,
        kind: ChannelKind,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run_subscription(epoch, address, kind).await })
    }

    /// Track a task spawned from inside another subscription task.
    fn adopt(&self, epoch: u64, handle: JoinHandle<()>) {
        let mut tasks = self.tasks();
        if self.core().is_current(epoch) {
            tasks.push(handle);
        } else {
            handle.abort();
        }
    }

    async fn open(&self, kind: ChannelKind, address: &str) -> Result<EventStream, TransportError> {
        let stream = match kind {
            ChannelKind::Balance => self
                .ledger
                .subscribe_balance(address)
                .await?
                .map(|r| r.map(ChannelEvent::Balance))
                .boxed(),
            ChannelKind::Ownership => self
                .ledger
                .subscribe_ownership(address)
                .await?
                .map(|r| r.map(ChannelEvent::Ownership))
                .boxed(),
        };
        Ok(stream)
    }

    /// Feed one channel into the core until the epoch ends or the stream
    /// closes cleanly. Transport failures mark the step unknown and wait for
    /// the ledger to reconnect before subscribing again.
    async fn run_subscription(self: Arc<Self>, epoch: u64, address: String, kind: ChannelKind) {
        loop {
            if !self.core().is_current(epoch) {
                return;
            }
            match self.open(kind, &address).await {
                Ok(mut stream) => {
                    debug!(address = %address, channel = %kind, feed = self.ledger.name(), "Subscribed");
                    let mut failed = false;
                    while let Some(item) = stream.next().await {
                        let event = match item {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(address = %address, channel = %kind, error = %e, "Subscription dropped");
                                failed = true;
                                ChannelEvent::Failed(kind)
                            }
                        };
                        if !self.dispatch(epoch, event).await {
                            return;
                        }
                        if failed {
                            break;
                        }
                    }
                    if !failed {
                        debug!(address = %address, channel = %kind, "Subscription ended");
                        return;
                    }
                }
                Err(e) => {
                    warn!(address = %address, channel = %kind, error = %e, "Subscription failed");
                    if !self.dispatch(epoch, ChannelEvent::Failed(kind)).await {
                        return;
                    }
                }
            }
            self.ledger.reconnected().await;
            debug!(address = %address, channel = %kind, "Retrying subscription");
        }
    }

    /// Apply an event and carry out its effects. Returns false once the
    /// epoch is over.
    async fn dispatch(self: &Arc<Self>, epoch: u64, event: ChannelEvent) -> bool {
        let effects = {
            let mut core = self.core();
            let Some(effects) = core.apply(epoch, event) else {
                return false;
            };
            self.publish(&core);
            effects
        };

        for effect in effects {
            match effect {
                Effect::OpenOwnership { address } => {
                    let handle = self.spawn_subscription(epoch, address, ChannelKind::Ownership);
                    self.adopt(epoch, handle);
                }
                Effect::RecordCompletion { address } => self.record_completion(&address).await,
            }
        }
        true
    }

    /// Best effort: a failed write only means one more onboarding next session.
    async fn record_completion(&self, address: &str) {
        match self.store.has(address).await {
            Ok(true) => {
                debug!(address = %address, "Onboarding already recorded");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(address = %address, error = %e, "Failed to read completion store"),
        }
        match self.store.set(address).await {
            Ok(()) => info!(address = %address, "Onboarding completed"),
            Err(e) => warn!(address = %address, error = %e, "Failed to record onboarding completion"),
        }
    }
}

/// Follow an identity watch channel, re-targeting the engine on every change.
///
/// Ends when the sender is dropped.
pub fn spawn_identity_follower(
    engine: Arc<OnboardingEngine>,
    mut identity_rx: watch::Receiver<Identity>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let initial = identity_rx.borrow_and_update().clone();
        engine.start(initial).await;
        while identity_rx.changed().await.is_ok() {
            let next = identity_rx.borrow_and_update().clone();
            engine.on_identity_change(next).await;
        }
        debug!("Identity source closed");
    })
}
