//! Core vocabulary types of the state machine.
//!
//! This module contains the leaf types everything else builds on:
//! - Lifecycle actions via [`StateAction`]
//! - Concrete-type state identity via [`StateId`]
//! - Label tags via [`Label`]
//! - Bounded diagnostic history via [`ActionHistory`]
//!
//! Nothing here holds behavior; these are plain values shared between the
//! orchestrator, the states, and external observers.

mod action;
mod history;
mod id;
mod label;

pub use action::StateAction;
pub use history::{ActionHistory, ActionRecord, MAX_ACTION_HISTORY};
pub use id::StateId;
pub use label::{Label, LABEL_NAMESPACE};
