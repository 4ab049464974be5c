//! Onboarding progression: which step the active account is on.
//!
//! The step is derived from the login state plus two live ledger channels
//! (free balance and space ownership). `EngineCore` holds the pure state
//! machine; `OnboardingEngine` owns the subscriptions and publishes
//! `EngineState` to readers.

pub mod core;
pub mod manager;
pub mod model;
pub mod routes;
pub mod state;

pub use manager::{OnboardingEngine, spawn_identity_follower};
pub use model::{BalanceSnapshot, EngineState, Identity, OwnershipSnapshot};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{Resolution, Step, StepStatus, derive_step};
