//! Identity, ledger snapshot, and engine state models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::{Step, StepStatus};

/// The account the session layer currently has selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub is_logged_in: bool,
}

impl Identity {
    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn logged_in(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            is_logged_in: true,
        }
    }

    /// The address to subscribe for, if any.
    ///
    /// A logged-out identity has no active address whatever its literal value.
    pub fn active_address(&self) -> Option<&str> {
        if !self.is_logged_in {
            return None;
        }
        self.address.as_deref().filter(|a| !a.is_empty())
    }
}

/// Balance of an account as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    pub free_balance: Decimal,
    /// Ledger block the snapshot was taken at, when the transport knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

impl BalanceSnapshot {
    pub fn new(free_balance: Decimal) -> Self {
        Self {
            free_balance,
            block: None,
        }
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }

    /// Whether the account holds no free tokens.
    pub fn is_empty(&self) -> bool {
        self.free_balance.is_zero()
    }
}

/// Whether an account owns at least one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSnapshot {
    pub owns_at_least_one_space: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

impl OwnershipSnapshot {
    pub fn new(owns_at_least_one_space: bool) -> Self {
        Self {
            owns_at_least_one_space,
            block: None,
        }
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }
}

/// Whether `next` may replace `prev` in a latest-known slot.
///
/// Only a lower block number marks a snapshot as stale; without block numbers
/// arrival order decides.
pub(crate) fn supersedes(prev: Option<u64>, next: Option<u64>) -> bool {
    match (prev, next) {
        (Some(p), Some(n)) => n >= p,
        _ => true,
    }
}

/// Externally observable onboarding state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub current_step: Step,
    pub status: StepStatus,
    pub aux_actions_performed: bool,
    pub show_onboarding: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            current_step: Step::LoggedOut,
            status: StepStatus::Resolved,
            aux_actions_performed: false,
            show_onboarding: true,
            address: None,
        }
    }
}

impl EngineState {
    /// The state as seen from `route`.
    ///
    /// The getting-started view is the onboarding flow itself, so it never shows
    /// the onboarding banner. `current_step` is left untouched.
    pub fn for_route(&self, route: &str, getting_started_path: &str) -> EngineState {
        let mut state = self.clone();
        if same_route(route, getting_started_path) {
            state.show_onboarding = false;
        }
        state
    }
}

fn same_route(a: &str, b: &str) -> bool {
    let a = a.split(['?', '#']).next().unwrap_or(a);
    let a = a.trim_end_matches('/');
    let b = b.trim_end_matches('/');
    !b.is_empty() && a == b
}

/// Settings keys used for completion persistence.
pub mod settings_keys {
    /// Owner row for the completion list (single local client).
    pub const LOCAL_USER: &str = "local";
}
