//! Errors surfaced by configuration and by transition operations.

use thiserror::Error;

use crate::core::{Label, StateId};

/// Errors raised while configuring or registering states.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("state {0} is already registered")]
    DuplicateState(StateId),

    #[error("state {0} is not registered")]
    UnknownState(StateId),

    #[error("label {0} is not a valid label tag; tags live under \"Label.\"")]
    InvalidLabel(Label),

    #[error("state {0} is the global state and cannot participate in the stack")]
    GlobalStateInStack(StateId),

    #[error("the state machine is already initialized")]
    AlreadyInitialized,
}

/// Recoverable precondition failures of the transition operations.
///
/// Every variant is returned to the caller with a logged warning and no
/// state change; nothing here panics on bad input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("the state machine is not initialized")]
    NotInitialized,

    #[error("state {0} is not registered")]
    NotRegistered(StateId),

    #[error("state {0} is already present in the stack")]
    AlreadyInStack(StateId),

    #[error("state {0} is in the stack below the top; pop back down to resume it")]
    StateInStackBelowTop(StateId),

    #[error("transition to {to} is blocked by the active state {from}")]
    Blocked { from: StateId, to: StateId },

    #[error("state {state} cannot deactivate: {reason}")]
    CannotDeactivate { state: StateId, reason: String },

    #[error("another transition is already in flight")]
    TransitionInFlight,

    #[error("the state stack is empty")]
    EmptyStack,

    #[error("no state is currently active")]
    NoActiveState,

    #[error("label {0} is not a valid label tag; tags live under \"Label.\"")]
    InvalidLabel(Label),

    #[error("label {0} is not registered with state {1}")]
    UnknownLabel(Label, StateId),

    #[error("state {0} is the global state and cannot be a transition target")]
    GlobalStateTarget(StateId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineState;

    struct Guard;
    impl MachineState for Guard {}

    struct Combat;
    impl MachineState for Combat {}

    #[test]
    fn messages_name_the_states_involved() {
        let err = TransitionError::Blocked {
            from: StateId::of::<Guard>(),
            to: StateId::of::<Combat>(),
        };
        assert_eq!(
            err.to_string(),
            "transition to Combat is blocked by the active state Guard"
        );

        let err = TransitionError::CannotDeactivate {
            state: StateId::of::<Guard>(),
            reason: "label Label.Default is mid-activation".into(),
        };
        assert!(err.to_string().contains("Guard"));
        assert!(err.to_string().contains("mid-activation"));
    }

    #[test]
    fn build_errors_render_the_label_tag() {
        let err = BuildError::InvalidLabel(Label::from_static("Patrol"));
        assert!(err.to_string().contains("Patrol"));
        assert!(err.to_string().contains("Label."));
    }
}
