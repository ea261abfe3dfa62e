//! Lifecycle actions delivered to machine states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the six lifecycle actions a state can receive.
///
/// Every action is delivered to exactly one state at a time and decomposes
/// into up to two semantic callbacks on [`MachineState`](crate::MachineState):
///
/// | Action   | Stack membership       | Activation        |
/// |----------|------------------------|-------------------|
/// | `Begin`  | added to stack         | activated         |
/// | `End`    | removed from stack     | deactivated       |
/// | `Push`   | added to stack         | activated         |
/// | `Pop`    | removed from stack     | deactivated       |
/// | `Resume` | —                      | activated         |
/// | `Pause`  | —                      | deactivated       |
///
/// # Example
///
/// ```
/// use stackfsm::StateAction;
///
/// assert!(StateAction::Push.adds_to_stack());
/// assert!(StateAction::Pause.deactivates());
/// assert!(!StateAction::Resume.removes_from_stack());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum StateAction {
    /// The state entered the stack through a goto or as the initial state.
    Begin,
    /// The state left the stack through a goto, an explicit end, or teardown.
    End,
    /// The state entered the stack on top of a paused state.
    Push,
    /// The state left the stack, uncovering the state below it.
    Pop,
    /// The state below a popped state became active again.
    Resume,
    /// The state stayed in the stack but another state was pushed above it.
    Pause,
}

impl StateAction {
    /// True for actions that place the state into the stack.
    pub fn adds_to_stack(self) -> bool {
        matches!(self, StateAction::Begin | StateAction::Push)
    }

    /// True for actions that remove the state from the stack.
    pub fn removes_from_stack(self) -> bool {
        matches!(self, StateAction::End | StateAction::Pop)
    }

    /// True for actions after which the state is the one ticking.
    pub fn activates(self) -> bool {
        matches!(
            self,
            StateAction::Begin | StateAction::Push | StateAction::Resume
        )
    }

    /// True for actions after which the state is no longer ticking.
    pub fn deactivates(self) -> bool {
        matches!(
            self,
            StateAction::End | StateAction::Pop | StateAction::Pause
        )
    }

    /// Human-readable name used in logs and history records.
    pub fn name(self) -> &'static str {
        match self {
            StateAction::Begin => "Begin",
            StateAction::End => "End",
            StateAction::Push => "Push",
            StateAction::Pop => "Pop",
            StateAction::Resume => "Resume",
            StateAction::Pause => "Pause",
        }
    }
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_decompose_into_membership_and_activation() {
        assert!(StateAction::Begin.adds_to_stack());
        assert!(StateAction::Begin.activates());
        assert!(StateAction::End.removes_from_stack());
        assert!(StateAction::End.deactivates());
        assert!(StateAction::Push.adds_to_stack());
        assert!(StateAction::Pop.removes_from_stack());

        assert!(!StateAction::Resume.adds_to_stack());
        assert!(!StateAction::Resume.removes_from_stack());
        assert!(StateAction::Resume.activates());
        assert!(!StateAction::Pause.adds_to_stack());
        assert!(StateAction::Pause.deactivates());
    }

    #[test]
    fn display_matches_name() {
        assert_eq!(StateAction::Resume.to_string(), "Resume");
        assert_eq!(StateAction::Pause.name(), "Pause");
    }

    #[test]
    fn serializes_as_variant_name() {
        let json = serde_json::to_string(&StateAction::Push).unwrap();
        assert_eq!(json, "\"Push\"");
        let back: StateAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StateAction::Push);
    }
}
