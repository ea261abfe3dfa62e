//! Property-based tests for the state machine.
//!
//! These tests use proptest to drive machines through randomly generated
//! operation sequences and verify the structural invariants hold after
//! every step.

use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;
use stackfsm::{
    FiniteStateMachine, GlobalState, Label, MachineState, PushRequestHandle, StateId,
    MAX_ACTION_HISTORY,
};

struct Command;
impl MachineState for Command {}
impl GlobalState for Command {}

struct Recon;
impl MachineState for Recon {}

struct Assault;
impl MachineState for Assault {}

struct Retreat;
impl MachineState for Retreat {}

struct Regroup;
impl MachineState for Regroup {}

fn state_ids() -> [StateId; 4] {
    [
        StateId::of::<Recon>(),
        StateId::of::<Assault>(),
        StateId::of::<Retreat>(),
        StateId::of::<Regroup>(),
    ]
}

fn machine() -> FiniteStateMachine {
    let mut fsm = FiniteStateMachine::builder()
        .global_state(Command)
        .state(Recon)
        .state(Assault)
        .state(Retreat)
        .state(Regroup)
        .initial_state::<Recon>(Label::DEFAULT)
        .build()
        .unwrap();
    fsm.set_active(true);
    fsm
}

#[derive(Clone, Debug)]
enum Op {
    Goto(u8),
    GotoForced(u8),
    Push(u8),
    PushQueued(u8),
    Pop,
    End,
    ClearStack,
    Tick,
    SetActive(bool),
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4u8).prop_map(Op::Goto),
        (0..4u8).prop_map(Op::GotoForced),
        (0..4u8).prop_map(Op::Push),
        (0..4u8).prop_map(Op::PushQueued),
        Just(Op::Pop),
        Just(Op::End),
        Just(Op::ClearStack),
        Just(Op::Tick),
        any::<bool>().prop_map(Op::SetActive),
    ]
}

fn goto(fsm: &mut FiniteStateMachine, which: u8, force: bool) {
    let _ = match which % 4 {
        0 => fsm.goto_state::<Recon>(Label::DEFAULT, force),
        1 => fsm.goto_state::<Assault>(Label::DEFAULT, force),
        2 => fsm.goto_state::<Retreat>(Label::DEFAULT, force),
        _ => fsm.goto_state::<Regroup>(Label::DEFAULT, force),
    };
}

fn push(fsm: &mut FiniteStateMachine, which: u8) {
    let _ = match which % 4 {
        0 => fsm.push_state::<Recon>(Label::DEFAULT).map(drop),
        1 => fsm.push_state::<Assault>(Label::DEFAULT).map(drop),
        2 => fsm.push_state::<Retreat>(Label::DEFAULT).map(drop),
        _ => fsm.push_state::<Regroup>(Label::DEFAULT).map(drop),
    };
}

fn push_queued(fsm: &mut FiniteStateMachine, which: u8) -> Option<PushRequestHandle> {
    match which % 4 {
        0 => fsm.push_state_queued::<Recon>(Label::DEFAULT).ok(),
        1 => fsm.push_state_queued::<Assault>(Label::DEFAULT).ok(),
        2 => fsm.push_state_queued::<Retreat>(Label::DEFAULT).ok(),
        _ => fsm.push_state_queued::<Regroup>(Label::DEFAULT).ok(),
    }
}

fn apply(fsm: &mut FiniteStateMachine, op: &Op, handles: &mut Vec<PushRequestHandle>) {
    match op {
        Op::Goto(which) => goto(fsm, *which, false),
        Op::GotoForced(which) => goto(fsm, *which, true),
        Op::Push(which) => push(fsm, *which),
        Op::PushQueued(which) => {
            if let Some(handle) = push_queued(fsm, *which) {
                handles.push(handle);
            }
        }
        Op::Pop => {
            let _ = fsm.pop_state();
        }
        Op::End => {
            let _ = fsm.end_state();
        }
        Op::ClearStack => {
            fsm.clear_stack();
        }
        Op::Tick => fsm.tick(0.5),
        Op::SetActive(active) => fsm.set_active(*active),
    }
}

fn check_invariants(fsm: &FiniteStateMachine) -> Result<(), TestCaseError> {
    let stack = fsm.stack();

    // No state appears in the stack twice.
    for (i, id) in stack.iter().enumerate() {
        prop_assert!(!stack[i + 1..].contains(id), "duplicate {id} in stack");
    }

    // The active state is exactly the stack top.
    prop_assert_eq!(fsm.active_state(), stack.last().copied());

    // At most one normal state is actively ticking, and it is the top.
    let snapshot = fsm.snapshot();
    let active: Vec<_> = snapshot
        .states
        .iter()
        .filter(|state| !state.is_global && state.is_active)
        .collect();
    prop_assert!(active.len() <= 1);
    if let Some(state) = active.first() {
        prop_assert_eq!(Some(state.state), fsm.active_state());
    }

    // History stays bounded.
    let records: Vec<_> = fsm.history().records().cloned().collect();
    prop_assert!(records.len() <= MAX_ACTION_HISTORY);

    // While no records have been evicted, replaying the delivered actions
    // reconstructs each state's presence and activity exactly.
    if records.len() < MAX_ACTION_HISTORY {
        for id in state_ids() {
            let mut present = false;
            let mut ticking = false;
            for record in records.iter().filter(|record| record.state == id) {
                if record.action.adds_to_stack() {
                    present = true;
                } else if record.action.removes_from_stack() {
                    present = false;
                }
                if record.action.activates() {
                    ticking = true;
                } else if record.action.deactivates() {
                    ticking = false;
                }
            }
            prop_assert_eq!(present, stack.contains(&id), "presence of {}", id);
            let is_active = snapshot
                .states
                .iter()
                .any(|state| state.state == id && state.is_active);
            prop_assert_eq!(ticking, is_active, "activity of {}", id);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn invariants_hold_across_operation_sequences(
        ops in prop::collection::vec(arbitrary_op(), 1..40)
    ) {
        let mut fsm = machine();
        let mut handles = Vec::new();
        check_invariants(&fsm)?;
        for op in &ops {
            apply(&mut fsm, op, &mut handles);
            check_invariants(&fsm)?;
        }
    }

    #[test]
    fn every_queued_push_request_resolves_exactly_once(
        ops in prop::collection::vec(arbitrary_op(), 1..40)
    ) {
        let mut fsm = machine();
        let mut handles = Vec::new();
        let mut broadcasts = Vec::new();
        for op in &ops {
            let before = handles.len();
            apply(&mut fsm, op, &mut handles);
            for handle in &handles[before..] {
                let count = Rc::new(Cell::new(0u32));
                let sink = Rc::clone(&count);
                handle.on_result(move |_| sink.set(sink.get() + 1));
                broadcasts.push(count);
            }
        }
        fsm.shutdown();

        // Shutdown settles anything still pending; nothing fires twice.
        for (handle, count) in handles.iter().zip(&broadcasts) {
            prop_assert!(handle.result().is_some());
            prop_assert_eq!(count.get(), 1);
        }
    }

    #[test]
    fn game_time_accumulates_tick_deltas_exactly(
        deltas in prop::collection::vec(0.0..10.0f64, 0..20)
    ) {
        let mut fsm = machine();
        let mut expected = 0.0f64;
        for delta in &deltas {
            fsm.tick(*delta);
            expected += delta;
        }
        prop_assert_eq!(fsm.time(), expected);
    }

    #[test]
    fn label_tags_validate_on_the_namespace(suffix in "[A-Za-z0-9]{0,12}") {
        let label = Label::new(format!("Label.{suffix}"));
        prop_assert_eq!(label.is_valid_tag(), !suffix.is_empty());
        // Without the namespace the tag is never valid.
        prop_assert!(!Label::new(suffix).is_valid_tag());
    }

    #[test]
    fn label_roundtrip_serialization(suffix in "[A-Za-z0-9]{1,12}") {
        let label = Label::new(format!("Label.{suffix}"));
        let json = serde_json::to_string(&label).unwrap();
        let back: Label = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, label);
    }

    #[test]
    fn snapshots_always_serialize(
        ops in prop::collection::vec(arbitrary_op(), 0..20)
    ) {
        let mut fsm = machine();
        let mut handles = Vec::new();
        for op in &ops {
            apply(&mut fsm, op, &mut handles);
        }
        let json = fsm.snapshot().to_json().unwrap();
        prop_assert!(json.contains("\"stack\""));
    }
}
