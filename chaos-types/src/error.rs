//! Error types for tierchaos-types.

use crate::lifecycle::LifecycleState;
use thiserror::Error;

/// A lifecycle transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition: {from} -> {to}")]
pub struct TransitionError {
    /// State the process was in.
    pub from: LifecycleState,
    /// State that was requested.
    pub to: LifecycleState,
}
