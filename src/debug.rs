//! Read-only snapshots for debugging overlays.

use serde::Serialize;

use crate::core::{ActionRecord, Label, StateAction, StateId};
use crate::fsm::machine::FsmCore;

/// A point-in-time, serializable view of one machine.
///
/// Produced by [`FiniteStateMachine::snapshot`](crate::FiniteStateMachine::snapshot)
/// for external observers such as a gameplay debugging overlay; holds no
/// references back into the machine.
#[derive(Clone, Debug, Serialize)]
pub struct FsmSnapshot {
    /// The currently active state, if any.
    pub active_state: Option<StateId>,
    /// The configured global state, if any.
    pub global_state: Option<StateId>,
    /// The stack, top to bottom.
    pub stack: Vec<StateId>,
    /// Accumulated game time in seconds.
    pub time: f64,
    /// Every registered state, in registration order.
    pub states: Vec<StateSnapshot>,
    /// The most recent lifecycle actions, oldest first (capped at 100).
    pub history: Vec<ActionRecord>,
}

/// One registered state inside an [`FsmSnapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub state: StateId,
    pub is_global: bool,
    pub is_active: bool,
    pub in_stack: bool,
    pub active_label: Label,
    pub running_labels: usize,
    pub latent_executions: usize,
    pub latent_tags: Vec<String>,
    pub last_action: Option<StateAction>,
    pub last_action_at: Option<f64>,
    /// The state's free-form debug text, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_data: Option<String>,
}

impl FsmSnapshot {
    pub(crate) fn capture(core: &FsmCore) -> Self {
        let stack_bottom_up = core.stack_snapshot();
        let mut stack = stack_bottom_up.clone();
        stack.reverse();

        let states = core
            .registered_slots()
            .iter()
            .map(|slot| {
                let unit = slot.unit.borrow();
                let last = slot.last_action.get();
                // The behavior value is mutably borrowed while a hook runs;
                // skip the debug text rather than observe it mid-dispatch.
                let debug_data = slot
                    .behavior
                    .try_borrow()
                    .ok()
                    .map(|behavior| behavior.debug_data())
                    .filter(|text| !text.is_empty());
                StateSnapshot {
                    state: slot.id,
                    is_global: slot.is_global,
                    is_active: slot.is_active.get(),
                    in_stack: stack_bottom_up.contains(&slot.id),
                    active_label: unit.active_label.clone(),
                    running_labels: unit.running_count(),
                    latent_executions: unit.latent_count(),
                    latent_tags: unit.latent_tags().map(str::to_owned).collect(),
                    last_action: last.map(|(action, _)| action),
                    last_action_at: last.map(|(_, at)| at),
                    debug_data,
                }
            })
            .collect();

        FsmSnapshot {
            active_state: core.active_id(),
            global_state: core.global_state_id(),
            stack,
            time: core.game_time(),
            states,
            history: core.history_records(),
        }
    }

    /// Renders the snapshot as pretty-printed JSON for overlay transport.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Label;
    use crate::fsm::FiniteStateMachine;
    use crate::machine::{GlobalState, MachineState};

    struct Overseer;
    impl MachineState for Overseer {}
    impl GlobalState for Overseer {}

    struct Roam;
    impl MachineState for Roam {
        fn debug_data(&self) -> String {
            "route=perimeter".into()
        }
    }

    struct Fight;
    impl MachineState for Fight {}

    fn machine() -> FiniteStateMachine {
        let mut fsm = FiniteStateMachine::builder()
            .global_state(Overseer)
            .state(Roam)
            .state(Fight)
            .initial_state::<Roam>(Label::DEFAULT)
            .build()
            .unwrap();
        fsm.set_active(true);
        fsm
    }

    #[test]
    fn snapshot_reports_stack_top_to_bottom() {
        let mut fsm = machine();
        fsm.push_state::<Fight>(Label::DEFAULT).unwrap();

        let snapshot = fsm.snapshot();
        assert_eq!(snapshot.active_state.unwrap().short_name(), "Fight");
        assert_eq!(snapshot.global_state.unwrap().short_name(), "Overseer");
        let names: Vec<_> = snapshot.stack.iter().map(|id| id.short_name()).collect();
        assert_eq!(names, vec!["Fight", "Roam"]);
    }

    #[test]
    fn snapshot_marks_active_and_paused_states() {
        let mut fsm = machine();
        fsm.push_state::<Fight>(Label::DEFAULT).unwrap();

        let snapshot = fsm.snapshot();
        let by_name = |name: &str| {
            snapshot
                .states
                .iter()
                .find(|s| s.state.short_name() == name)
                .unwrap()
        };
        assert!(by_name("Fight").is_active);
        assert!(!by_name("Roam").is_active);
        assert!(by_name("Roam").in_stack);
        assert!(by_name("Overseer").is_global);
        assert!(!by_name("Overseer").in_stack);
        assert_eq!(by_name("Roam").debug_data.as_deref(), Some("route=perimeter"));
        assert!(by_name("Fight").debug_data.is_none());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let fsm = machine();
        let json = fsm.snapshot().to_json().unwrap();
        assert!(json.contains("\"Roam\""));
        assert!(json.contains("\"Overseer\""));
        assert!(json.contains("\"Begin\""));
    }

    #[test]
    fn history_is_carried_in_delivery_order() {
        let mut fsm = machine();
        fsm.push_state::<Fight>(Label::DEFAULT).unwrap();
        fsm.pop_state().unwrap();

        let actions: Vec<_> = fsm
            .snapshot()
            .history
            .iter()
            .map(|record| format!("{}.{}", record.state.short_name(), record.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                "Overseer.Begin",
                "Roam.Begin",
                "Roam.Pause",
                "Fight.Push",
                "Fight.Pop",
                "Roam.Resume"
            ]
        );
    }
}
