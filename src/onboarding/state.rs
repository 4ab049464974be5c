//! Onboarding step machine: which step an account is on, and how it is derived
//! from the latest ledger observations.

use serde::{Deserialize, Serialize};

use super::model::{BalanceSnapshot, OwnershipSnapshot};

/// The steps of the onboarding flow.
///
/// Ordered: LoggedOut → HasNoTokens → HasNoSpace → Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    LoggedOut,
    HasNoTokens,
    HasNoSpace,
    Done,
}

impl Step {
    /// All steps in onboarding order.
    pub const ALL: [Step; 4] = [
        Step::LoggedOut,
        Step::HasNoTokens,
        Step::HasNoSpace,
        Step::Done,
    ];

    /// Ordinal of the step (0 for `LoggedOut`, 3 for `Done`).
    pub fn index(&self) -> u8 {
        match self {
            Self::LoggedOut => 0,
            Self::HasNoTokens => 1,
            Self::HasNoSpace => 2,
            Self::Done => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Step> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Check if a manual advance from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Step) -> bool {
        self.next() == Some(target)
    }

    /// Whether this step is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Get the next step in order, if any.
    pub fn next(&self) -> Option<Step> {
        match self {
            Self::LoggedOut => Some(Self::HasNoTokens),
            Self::HasNoTokens => Some(Self::HasNoSpace),
            Self::HasNoSpace => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::LoggedOut
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LoggedOut => "logged_out",
            Self::HasNoTokens => "has_no_tokens",
            Self::HasNoSpace => "has_no_space",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logged_out" => Ok(Self::LoggedOut),
            "has_no_tokens" => Ok(Self::HasNoTokens),
            "has_no_space" => Ok(Self::HasNoSpace),
            "done" => Ok(Self::Done),
            other => Err(format!("Unknown onboarding step: {other}")),
        }
    }
}

/// How much the engine trusts the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Subscriptions are open but the snapshots the step depends on have not arrived.
    Pending,
    /// The step follows from received snapshots (or from being logged out).
    Resolved,
    /// A channel failed; the step is unknown until the transport reconnects.
    Unknown,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Resolved
    }
}

/// Output of [`derive_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub step: Step,
    /// False while the step is a placeholder waiting on a snapshot.
    pub settled: bool,
}

impl Resolution {
    fn settled(step: Step) -> Self {
        Self {
            step,
            settled: true,
        }
    }

    fn tentative(step: Step) -> Self {
        Self {
            step,
            settled: false,
        }
    }
}

/// Derive the onboarding step from the latest known observations.
///
/// Ownership only counts once the balance is known to be non-zero.
pub fn derive_step(
    balance: Option<&BalanceSnapshot>,
    ownership: Option<&OwnershipSnapshot>,
    is_logged_in: bool,
) -> Resolution {
    if !is_logged_in {
        return Resolution::settled(Step::LoggedOut);
    }
    let Some(balance) = balance else {
        return Resolution::tentative(Step::HasNoTokens);
    };
    if balance.is_empty() {
        return Resolution::settled(Step::HasNoTokens);
    }
    match ownership {
        None => Resolution::tentative(Step::HasNoSpace),
        Some(o) if o.owns_at_least_one_space => Resolution::settled(Step::Done),
        Some(_) => Resolution::settled(Step::HasNoSpace),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn valid_transitions() {
        use Step::*;
        for (from, to) in [(LoggedOut, HasNoTokens), (HasNoTokens, HasNoSpace), (HasNoSpace, Done)] {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use Step::*;
        // Skip steps
        assert!(!LoggedOut.can_transition_to(Done));
        assert!(!LoggedOut.can_transition_to(HasNoSpace));
        // Go backward
        assert!(!HasNoSpace.can_transition_to(HasNoTokens));
        // Terminal
        assert!(!Done.can_transition_to(LoggedOut));
        // Self-transition
        assert!(!HasNoTokens.can_transition_to(HasNoTokens));
    }

    #[test]
    fn ordinals_match_onboarding_order() {
        for (i, step) in Step::ALL.iter().enumerate() {
            assert_eq!(usize::from(step.index()), i);
            assert_eq!(Step::from_index(step.index()), Some(*step));
        }
        assert!(Step::from_index(4).is_none());
        assert!(Step::LoggedOut < Step::Done);
    }

    #[test]
    fn display_matches_serde_and_from_str() {
        for step in Step::ALL {
            let display = format!("{step}");
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{display}\""), json, "Display and serde should match for {step:?}");
            assert_eq!(display.parse::<Step>().unwrap(), step);
        }
        assert!("finish".parse::<Step>().is_err());
    }

    #[test]
    fn logged_out_ignores_observations() {
        let balance = BalanceSnapshot::new(dec!(500));
        let owns = OwnershipSnapshot::new(true);
        let r = derive_step(Some(&balance), Some(&owns), false);
        assert_eq!(r, Resolution::settled(Step::LoggedOut));
    }

    #[test]
    fn no_balance_yet_is_tentative() {
        let r = derive_step(None, None, true);
        assert_eq!(r.step, Step::HasNoTokens);
        assert!(!r.settled);
    }

    #[test]
    fn zero_balance_wins_over_ownership() {
        let balance = BalanceSnapshot::new(dec!(0));
        let owns = OwnershipSnapshot::new(true);
        let r = derive_step(Some(&balance), Some(&owns), true);
        assert_eq!(r, Resolution::settled(Step::HasNoTokens));
    }

    #[test]
    fn funded_without_ownership_is_optimistic() {
        let balance = BalanceSnapshot::new(dec!(500));
        let r = derive_step(Some(&balance), None, true);
        assert_eq!(r, Resolution::tentative(Step::HasNoSpace));
    }

    #[test]
    fn funded_and_owning_is_done() {
        let balance = BalanceSnapshot::new(dec!(0.0001));
        let none = OwnershipSnapshot::new(false);
        let some = OwnershipSnapshot::new(true);
        assert_eq!(
            derive_step(Some(&balance), Some(&none), true),
            Resolution::settled(Step::HasNoSpace)
        );
        assert_eq!(
            derive_step(Some(&balance), Some(&some), true),
            Resolution::settled(Step::Done)
        );
    }
}
