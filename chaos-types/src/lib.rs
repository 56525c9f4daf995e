//! # chaos-types
//!
//! Types shared by every tierchaos crate:
//! - [`ServerRole`], [`NodeId`] - which tier a process belongs to and its position in it
//! - [`LifecycleState`] - the per-process state machine (Stopped → Starting → Running → Killed)
//! - [`ErrorCategory`] - how a failed SQL operation is treated (retry, benign, fatal)
//! - [`TransitionError`] - an illegal lifecycle transition

#![warn(missing_docs)]
#![warn(clippy::all)]

mod category;
mod error;
mod lifecycle;
mod role;

pub use category::ErrorCategory;
pub use error::TransitionError;
pub use lifecycle::LifecycleState;
pub use role::{NodeId, ServerRole};
