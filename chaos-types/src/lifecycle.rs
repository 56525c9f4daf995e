//! Per-process lifecycle state machine.
//!
//! Pure transitions with no I/O. The cluster controller owns the processes and
//! calls [`LifecycleState::transition`] before every spawn, probe and kill so an
//! out-of-order operation surfaces as a [`TransitionError`] instead of a stray
//! process.

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Never started.
    Stopped,
    /// Spawned, health probe not yet passed.
    Starting,
    /// Health probe passed.
    Running,
    /// Terminated and reaped. Terminal unless explicitly restarted.
    Killed,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Legal: Stopped→Starting, Starting→Running, Running→Killed,
    /// Starting→Killed (startup failure), Killed→Starting (restart).
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Killed)
                | (Running, Killed)
                | (Killed, Starting)
        )
    }

    /// Move to `next`, or report the illegal transition.
    pub fn transition(self, next: LifecycleState) -> Result<LifecycleState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Whether an OS process may exist for a node in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Killed => "killed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn full_cycle_with_restart() {
        let s = Stopped;
        let s = s.transition(Starting).unwrap();
        let s = s.transition(Running).unwrap();
        let s = s.transition(Killed).unwrap();
        let s = s.transition(Starting).unwrap();
        let s = s.transition(Running).unwrap();
        assert_eq!(s, Running);
    }

    #[test]
    fn failed_startup_can_be_killed() {
        assert!(Starting.can_transition_to(Killed));
    }

    #[test]
    fn no_transition_skips_starting() {
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Killed.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Killed));
    }

    #[test]
    fn no_backwards_transitions() {
        assert!(!Running.can_transition_to(Starting));
        assert!(!Killed.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn illegal_transition_reports_both_ends() {
        let err = Running.transition(Starting).unwrap_err();
        assert_eq!(err.from, Running);
        assert_eq!(err.to, Starting);
        assert_eq!(err.to_string(), "illegal lifecycle transition: running -> starting");
    }

    #[test]
    fn live_states() {
        assert!(Starting.is_live());
        assert!(Running.is_live());
        assert!(!Stopped.is_live());
        assert!(!Killed.is_live());
    }
}
