/// Unit state definitions for tracking fetch progress
///
/// This module defines every state a fetch unit can be in while its retry
/// state machine runs, and which transitions between them are legal.
use std::fmt;

/// Represents the current state of a fetch unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    // ===== Active States =====
    /// Unit has been created but no attempt has started
    Pending,

    /// An attempt for this unit is currently running
    InFlight,

    /// The last attempt failed transiently and the unit is waiting out its backoff
    RetryScheduled,

    // ===== Terminal States =====
    /// An attempt succeeded and produced a record
    Succeeded,

    /// Retries were used up, or a fatal error was observed
    Exhausted,

    // ===== Final, non-terminal =====
    /// The unit was never started because the run was cancelled
    Cancelled,
}

impl UnitState {
    /// Returns true if this is a terminal fetch result
    ///
    /// `Cancelled` is final but not terminal: no attempt ever ran.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }

    /// Returns true if the unit can make no further progress
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted | Self::Cancelled)
    }

    /// Returns true if the unit may still be processed
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight | Self::RetryScheduled)
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// ```text
    /// Pending -> InFlight | Cancelled
    /// InFlight -> Succeeded | RetryScheduled | Exhausted
    /// RetryScheduled -> InFlight | Exhausted
    /// ```
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::Pending, Self::Cancelled)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::RetryScheduled)
                | (Self::InFlight, Self::Exhausted)
                | (Self::RetryScheduled, Self::InFlight)
                | (Self::RetryScheduled, Self::Exhausted)
        )
    }

    /// Converts the state to the string used in task logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::RetryScheduled => "retry_scheduled",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a state from its log string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "retry_scheduled" => Some(Self::RetryScheduled),
            "succeeded" => Some(Self::Succeeded),
            "exhausted" => Some(Self::Exhausted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible unit states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::InFlight,
            Self::RetryScheduled,
            Self::Succeeded,
            Self::Exhausted,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!UnitState::Pending.is_terminal());
        assert!(!UnitState::InFlight.is_terminal());
        assert!(!UnitState::RetryScheduled.is_terminal());
        assert!(!UnitState::Cancelled.is_terminal());

        assert!(UnitState::Succeeded.is_terminal());
        assert!(UnitState::Exhausted.is_terminal());
    }

    #[test]
    fn test_cancelled_is_final() {
        assert!(UnitState::Cancelled.is_final());
        assert!(!UnitState::Cancelled.is_active());
        assert!(!UnitState::InFlight.is_final());
    }

    #[test]
    fn test_retry_cycle_is_legal() {
        assert!(UnitState::Pending.can_transition_to(UnitState::InFlight));
        assert!(UnitState::InFlight.can_transition_to(UnitState::RetryScheduled));
        assert!(UnitState::RetryScheduled.can_transition_to(UnitState::InFlight));
        assert!(UnitState::InFlight.can_transition_to(UnitState::Succeeded));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!UnitState::Pending.can_transition_to(UnitState::Succeeded));
        assert!(!UnitState::Succeeded.can_transition_to(UnitState::InFlight));
        assert!(!UnitState::Exhausted.can_transition_to(UnitState::RetryScheduled));
        assert!(!UnitState::InFlight.can_transition_to(UnitState::Cancelled));
        assert!(!UnitState::Cancelled.can_transition_to(UnitState::InFlight));
    }

    #[test]
    fn test_final_states_have_no_successors() {
        for from in UnitState::all_states().into_iter().filter(|s| s.is_final()) {
            for to in UnitState::all_states() {
                assert!(
                    !from.can_transition_to(to),
                    "{:?} should not transition to {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_roundtrip_string() {
        for state in UnitState::all_states() {
            assert_eq!(UnitState::parse(state.as_str()), Some(state));
        }
        assert_eq!(UnitState::parse("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", UnitState::InFlight), "in_flight");
        assert_eq!(format!("{}", UnitState::Exhausted), "exhausted");
    }
}
