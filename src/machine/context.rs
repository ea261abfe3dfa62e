//! The handle a state uses to reach its owning machine.

use std::future::Future;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::core::{Label, StateAction, StateId};
use crate::fsm::machine::FsmCore;
use crate::fsm::{PushRequestHandle, TransitionError};
use crate::latent::{LatentExecution, NextTick, PushWait, Sleep};
use crate::machine::MachineState;

/// A state's non-owning back-reference to its machine.
///
/// Every lifecycle hook receives a `&StateContext`, and every label factory
/// receives one by value; cloning is cheap. Through it a state requests
/// transitions, switches its own labels, spawns latent executions, and reads
/// machine time and its data object. The machine exclusively owns all state
/// instances, so the reference is weak: once the machine is gone, operations
/// fail with [`TransitionError::NotInitialized`] and queries return their
/// empty values.
#[derive(Clone)]
pub struct StateContext {
    core: Weak<FsmCore>,
    state: StateId,
}

impl StateContext {
    pub(crate) fn new(core: Weak<FsmCore>, state: StateId) -> Self {
        StateContext { core, state }
    }

    /// The identity of the state this context belongs to.
    pub fn state_id(&self) -> StateId {
        self.state
    }

    fn core(&self) -> Result<Rc<FsmCore>, TransitionError> {
        self.core.upgrade().ok_or(TransitionError::NotInitialized)
    }

    // --- transitions -----------------------------------------------------

    /// Requests a transition replacing the active state with `T`. See
    /// [`FiniteStateMachine::goto_state`](crate::FiniteStateMachine::goto_state).
    pub fn goto_state<T: MachineState>(
        &self,
        label: Label,
        force_events: bool,
    ) -> Result<(), TransitionError> {
        self.core()?
            .goto_state(StateId::of::<T>(), label, force_events)
    }

    /// Requests pushing `T` on top of the active state. See
    /// [`FiniteStateMachine::push_state`](crate::FiniteStateMachine::push_state).
    pub fn push_state<T: MachineState>(&self, label: Label) -> Result<PushWait, TransitionError> {
        self.core()?.push_state(StateId::of::<T>(), label)
    }

    /// Requests pushing `T`, queueing the request if it cannot currently be
    /// satisfied. See
    /// [`FiniteStateMachine::push_state_queued`](crate::FiniteStateMachine::push_state_queued).
    pub fn push_state_queued<T: MachineState>(
        &self,
        label: Label,
    ) -> Result<PushRequestHandle, TransitionError> {
        self.core()?.push_state_queued(StateId::of::<T>(), label)
    }

    /// Requests popping the active state off the stack.
    pub fn pop_state(&self) -> Result<(), TransitionError> {
        self.core()?.remove_top(StateAction::Pop)
    }

    /// Requests ending the active state (forced termination).
    pub fn end_state(&self) -> Result<(), TransitionError> {
        self.core()?.remove_top(StateAction::End)
    }

    /// Ends states until the stack is empty; returns the count ended.
    pub fn clear_stack(&self) -> usize {
        match self.core() {
            Ok(core) => core.clear_stack(),
            Err(_) => 0,
        }
    }

    // --- labels and latent executions ------------------------------------

    /// Switches this state's active label. The current labels and latent
    /// executions stop; the new label starts fresh on the next tick.
    pub fn goto_label(&self, label: Label) -> Result<(), TransitionError> {
        let core = self.core()?;
        let slot = core
            .find_slot(self.state)
            .ok_or(TransitionError::NotRegistered(self.state))?;
        core.goto_label_on(&slot, label)
    }

    /// Stops every latent execution across all states of the owning
    /// machine; returns the count canceled.
    pub fn stop_latent_execution(&self) -> usize {
        match self.core() {
            Ok(core) => core.stop_every_latent_execution(),
            Err(_) => 0,
        }
    }

    /// Wraps `operation` as a cancellable latent execution owned by this
    /// state. Awaiting the result suspends until the operation completes or
    /// is canceled, and then further until this state is active again (or
    /// destroyed), so the continuation never runs while the state is paused.
    pub fn run_latent<F>(&self, operation: F) -> LatentExecution
    where
        F: Future<Output = ()> + 'static,
    {
        self.run_latent_named("latent execution", operation)
    }

    /// [`run_latent`](Self::run_latent) with a debug tag shown in snapshots.
    pub fn run_latent_named<F>(&self, tag: &str, operation: F) -> LatentExecution
    where
        F: Future<Output = ()> + 'static,
    {
        LatentExecution::new(self.core.clone(), self.state, tag.to_owned(), operation)
    }

    /// A future resolving after `seconds` of game time.
    pub fn sleep(&self, seconds: f64) -> Sleep {
        Sleep::new(self.core.clone(), seconds)
    }

    /// A future resolving on the next tick.
    pub fn next_tick(&self) -> NextTick {
        NextTick::new(self.core.clone())
    }

    // --- data objects ----------------------------------------------------

    /// This state's data object, if it exists and is of type `D`.
    pub fn data<D: 'static>(&self) -> Option<Rc<D>> {
        self.typed_data::<D>(self.state)
    }

    /// The data object of state `S`, if it exists and is of type `D`.
    pub fn state_data<S: MachineState, D: 'static>(&self) -> Option<Rc<D>> {
        self.typed_data::<D>(StateId::of::<S>())
    }

    fn typed_data<D: 'static>(&self, state: StateId) -> Option<Rc<D>> {
        let core = self.core.upgrade()?;
        let slot = core.find_slot(state)?;
        let Some(data) = slot.data.clone() else {
            warn!(state = %state, "state has no data object");
            return None;
        };
        match Rc::downcast::<D>(data) {
            Ok(data) => Some(data),
            Err(_) => {
                warn!(
                    state = %state,
                    requested = std::any::type_name::<D>(),
                    "state data object is of a different type"
                );
                None
            }
        }
    }

    // --- queries ---------------------------------------------------------

    /// Accumulated game time in seconds.
    pub fn time(&self) -> f64 {
        self.core.upgrade().map_or(0.0, |core| core.game_time())
    }

    /// Game-time seconds elapsed since `earlier`.
    pub fn time_since(&self, earlier: f64) -> f64 {
        self.time() - earlier
    }

    /// True while this state is the one currently ticking.
    pub fn is_active(&self) -> bool {
        self.with_slot(|slot| slot.is_active.get())
    }

    /// True while one of this state's lifecycle callbacks is executing.
    /// Transition requests made during this window are deferred, not
    /// applied.
    pub fn is_dispatching(&self) -> bool {
        self.with_slot(|slot| slot.dispatching.get())
    }

    /// This state's most recent lifecycle action and the game time it was
    /// delivered.
    pub fn last_action(&self) -> Option<(StateAction, f64)> {
        self.core
            .upgrade()
            .and_then(|core| core.find_slot(self.state))
            .and_then(|slot| slot.last_action.get())
    }

    /// Game-time seconds since this state's last lifecycle action.
    pub fn time_since_last_action(&self) -> Option<f64> {
        self.last_action().map(|(_, at)| self.time() - at)
    }

    /// The currently active state of the owning machine.
    pub fn active_state(&self) -> Option<StateId> {
        self.core.upgrade().and_then(|core| core.active_id())
    }

    /// The stack, bottom to top.
    pub fn stack(&self) -> Vec<StateId> {
        self.core
            .upgrade()
            .map_or_else(Vec::new, |core| core.stack_snapshot())
    }

    /// True if `T` is anywhere in the stack.
    pub fn is_in_stack<T: MachineState>(&self) -> bool {
        self.stack().contains(&StateId::of::<T>())
    }

    fn with_slot(&self, read: impl FnOnce(&crate::fsm::machine::StateSlot) -> bool) -> bool {
        self.core
            .upgrade()
            .and_then(|core| core.find_slot(self.state))
            .is_some_and(|slot| read(&slot))
    }
}
