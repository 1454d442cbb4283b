//! Race entry lifecycle
//!
//! `Unregistered -> Registered -> {Resolved | Expired | Cancelled}`.
//! Terminal states have no outgoing transitions.
//!
//! The arbiter does not store a state per entry: an entry in the registry is
//! `Registered`, and removing it is the transition to a terminal state. This
//! table describes those transitions and is checked in debug builds when an
//! entry is finished.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one race entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceState {
    /// No entry exists
    Unregistered,
    /// Waiting for either channel
    Registered,
    /// A channel won the race
    Resolved,
    /// Deadline elapsed first
    Expired,
    /// Cancelled, replaced, or shut down
    Cancelled,
}

impl RaceState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Expired | Self::Cancelled)
    }
}

impl fmt::Display for RaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal race transition {from} -> {to}")]
pub struct IllegalTransition {
    /// State before
    pub from: RaceState,
    /// Requested state
    pub to: RaceState,
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: RaceState) -> &'static [RaceState] {
    use RaceState::{Cancelled, Expired, Registered, Resolved, Unregistered};
    match from {
        Unregistered => &[Registered],
        Registered => &[Resolved, Expired, Cancelled],
        Resolved | Expired | Cancelled => &[],
    }
}

/// Validate a lifecycle transition
///
/// # Errors
/// `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: RaceState, to: RaceState) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_reaches_every_terminal_state() {
        for to in [RaceState::Resolved, RaceState::Expired, RaceState::Cancelled] {
            assert!(validate_transition(RaceState::Registered, to).is_ok());
            assert!(to.is_terminal());
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [RaceState::Resolved, RaceState::Expired, RaceState::Cancelled] {
            assert!(allowed_transitions(from).is_empty());
            assert!(validate_transition(from, RaceState::Registered).is_err());
        }
    }

    #[test]
    fn cannot_resolve_unregistered() {
        let err = validate_transition(RaceState::Unregistered, RaceState::Resolved).unwrap_err();
        assert_eq!(err.to_string(), "illegal race transition unregistered -> resolved");
    }
}
