//! Synchronous heart of the onboarding engine.
//!
//! `EngineCore` holds the latest snapshot of each channel for the active
//! identity and re-derives the whole state from them on every event. Every
//! event carries the epoch it was registered under; events from an older
//! epoch (a previous identity, or a disposed engine) are discarded.
//!
//! The core performs no I/O. Side effects it wants (opening the ownership
//! subscription, recording completion) are returned as [`Effect`]s for the
//! async driver to carry out.

use tracing::debug;

use super::model::{BalanceSnapshot, EngineState, Identity, OwnershipSnapshot, supersedes};
use super::state::{Step, StepStatus, derive_step};
use crate::channels::ChannelKind;
use crate::error::OnboardingError;

/// Something a channel subscription delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Balance(BalanceSnapshot),
    Ownership(OwnershipSnapshot),
    /// The named channel failed; its latest snapshot is no longer trusted.
    Failed(ChannelKind),
}

/// Follow-up work requested by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the ownership subscription for the active address.
    OpenOwnership { address: String },
    /// Record the active address in the completion store.
    RecordCompletion { address: String },
}

/// Onboarding state for one identity at a time.
#[derive(Debug, Default)]
pub struct EngineCore {
    epoch: u64,
    disposed: bool,
    identity: Identity,
    /// Ticket of the most recent switch request and the identity it asked
    /// for. Runs ahead of `identity` while a switch awaits the store.
    requested: u64,
    target: Identity,
    balance: Option<BalanceSnapshot>,
    ownership: Option<OwnershipSnapshot>,
    balance_failed: bool,
    ownership_failed: bool,
    ownership_open: bool,
    recorded: bool,
    state: EngineState,
}

impl EngineCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Latest state, without any route override.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether events registered under `epoch` may still touch the state.
    pub fn is_current(&self, epoch: u64) -> bool {
        !self.disposed && epoch == self.epoch
    }

    /// Claim a ticket for switching to `identity`.
    ///
    /// `None` once disposed, or when `identity` is already the latest target
    /// and `force` is off. Any older ticket still in flight is superseded.
    pub fn begin_switch(&mut self, identity: &Identity, force: bool) -> Option<u64> {
        if self.disposed {
            debug!("Engine disposed, ignoring identity change");
            return None;
        }
        if !force && self.requested > 0 && &self.target == identity {
            debug!("Identity unchanged, keeping subscriptions");
            return None;
        }
        self.requested += 1;
        self.target = identity.clone();
        Some(self.requested)
    }

    /// Complete the switch claimed by `ticket`. Returns the new epoch, or
    /// `None` if a newer switch or `dispose` came in meanwhile.
    pub fn finish_switch(
        &mut self,
        ticket: u64,
        identity: Identity,
        already_completed: bool,
    ) -> Option<u64> {
        if self.disposed || ticket != self.requested {
            debug!(ticket, latest = self.requested, "Dropping superseded identity switch");
            return None;
        }
        Some(self.reset(identity, already_completed))
    }

    /// Switch to `identity`, invalidating everything registered before.
    ///
    /// `already_completed` seeds `show_onboarding` until the first settled
    /// derivation. Returns the new epoch. Does not revive a disposed core.
    pub fn reset(&mut self, identity: Identity, already_completed: bool) -> u64 {
        self.epoch += 1;
        self.balance = None;
        self.ownership = None;
        self.balance_failed = false;
        self.ownership_failed = false;
        self.ownership_open = false;
        self.recorded = false;

        let address = identity.active_address().map(str::to_string);
        let (current_step, status, show_onboarding) = match address {
            None => (Step::LoggedOut, StepStatus::Resolved, true),
            Some(_) => (Step::HasNoTokens, StepStatus::Pending, !already_completed),
        };
        self.state = EngineState {
            current_step,
            status,
            aux_actions_performed: self.state.aux_actions_performed,
            show_onboarding,
            address,
        };
        self.identity = identity;
        self.epoch
    }

    /// Invalidate all registered callbacks. Idempotent.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.epoch += 1;
            self.requested += 1;
            self.disposed = true;
        }
    }

    /// Apply a channel event registered under `epoch`.
    ///
    /// Returns `None` when the event is stale and was discarded, otherwise the
    /// effects the driver must carry out (possibly none).
    pub fn apply(&mut self, epoch: u64, event: ChannelEvent) -> Option<Vec<Effect>> {
        if !self.is_current(epoch) {
            debug!(epoch, current = self.epoch, "Discarding snapshot from stale subscription");
            return None;
        }
        let address = self.identity.active_address()?.to_string();

        let mut effects = Vec::new();
        match event {
            ChannelEvent::Balance(snapshot) => {
                if !supersedes(self.balance.as_ref().and_then(|b| b.block), snapshot.block) {
                    debug!(address = %address, block = ?snapshot.block, "Ignoring stale balance snapshot");
                    return Some(effects);
                }
                if !snapshot.is_empty() && !self.ownership_open {
                    self.ownership_open = true;
                    effects.push(Effect::OpenOwnership {
                        address: address.clone(),
                    });
                }
                self.balance = Some(snapshot);
                self.balance_failed = false;
            }
            ChannelEvent::Ownership(snapshot) => {
                if !supersedes(self.ownership.as_ref().and_then(|o| o.block), snapshot.block) {
                    debug!(address = %address, block = ?snapshot.block, "Ignoring stale ownership snapshot");
                    return Some(effects);
                }
                self.ownership = Some(snapshot);
                self.ownership_failed = false;
            }
            ChannelEvent::Failed(ChannelKind::Balance) => {
                self.balance = None;
                self.balance_failed = true;
            }
            ChannelEvent::Failed(ChannelKind::Ownership) => {
                self.ownership = None;
                self.ownership_failed = true;
            }
        }

        self.rederive();

        if self.state.current_step == Step::Done && !self.recorded {
            self.recorded = true;
            effects.push(Effect::RecordCompletion { address });
        }
        Some(effects)
    }

    fn rederive(&mut self) {
        let resolution = derive_step(
            self.balance.as_ref(),
            self.ownership.as_ref(),
            self.identity.active_address().is_some(),
        );
        self.state.current_step = resolution.step;
        if resolution.settled {
            self.state.show_onboarding = resolution.step != Step::Done;
        }
        self.state.status = if self.balance_failed || self.ownership_failed {
            StepStatus::Unknown
        } else if resolution.settled {
            StepStatus::Resolved
        } else {
            StepStatus::Pending
        };
    }

    pub fn set_aux_action(&mut self, value: bool) -> Result<(), OnboardingError> {
        if self.disposed {
            return Err(OnboardingError::Disposed);
        }
        self.state.aux_actions_performed = value;
        Ok(())
    }

    /// Move the displayed step forward by one.
    ///
    /// Holds until the next snapshot re-derives the step from observations.
    pub fn advance_step(&mut self, step: Step) -> Result<Step, OnboardingError> {
        if self.disposed {
            return Err(OnboardingError::Disposed);
        }
        let from = self.state.current_step;
        if !from.can_transition_to(step) {
            return Err(OnboardingError::InvalidTransition { from, to: step });
        }
        self.state.current_step = step;
        self.state.show_onboarding = !step.is_terminal();
        Ok(step)
    }
}
