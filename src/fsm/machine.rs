//! The owning machine: state registry, stack, and transition orchestration.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::core::{ActionHistory, ActionRecord, Label, StateAction, StateId};
use crate::debug::FsmSnapshot;
use crate::fsm::builder::FsmBuilder;
use crate::fsm::queue::{PendingPushRequest, PushRequestHandle, PushResult, RequestShared};
use crate::fsm::{BuildError, TransitionError};
use crate::latent::{poll_unit, PushWait};
use crate::machine::labels::LabelUnit;
use crate::machine::{GlobalState, LabelRegistry, MachineState, StateContext};

/// Default game-time interval between sweeps of resolved latent-execution
/// cancellers.
pub const DEFAULT_SWEEP_INTERVAL: f64 = 60.0;

/// One registered state: the boxed behavior value plus the orchestrator's
/// bookkeeping for it. The metadata lives beside the behavior so
/// precondition checks never alias a hook's `&mut self` borrow.
pub(crate) struct StateSlot {
    pub(crate) id: StateId,
    pub(crate) is_global: bool,
    pub(crate) behavior: RefCell<Box<dyn MachineState>>,
    pub(crate) data: Option<Rc<dyn Any>>,
    pub(crate) blocked: HashSet<StateId>,
    pub(crate) labels: LabelRegistry,
    pub(crate) unit: RefCell<LabelUnit>,
    pub(crate) dispatching: Cell<bool>,
    pub(crate) activating_label: Cell<bool>,
    pub(crate) is_active: Cell<bool>,
    pub(crate) destroyed: Cell<bool>,
    pub(crate) last_action: Cell<Option<(StateAction, f64)>>,
}

impl StateSlot {
    fn new<S: MachineState>(state: S, is_global: bool) -> Self {
        let id = StateId::of::<S>();
        let mut labels = LabelRegistry::new(id);
        state.register_labels(&mut labels);
        let data = state.create_data();
        let blocked = state.blocked_transitions().into_iter().collect();
        StateSlot {
            id,
            is_global,
            behavior: RefCell::new(Box::new(state)),
            data,
            blocked,
            labels,
            unit: RefCell::new(LabelUnit::new()),
            dispatching: Cell::new(false),
            activating_label: Cell::new(false),
            is_active: Cell::new(false),
            destroyed: Cell::new(false),
            last_action: Cell::new(None),
        }
    }

    fn can_safely_deactivate(&self) -> Result<(), String> {
        if self.activating_label.get() {
            let label = self.unit.borrow().active_label.clone();
            Err(format!("label {label} is mid-activation"))
        } else {
            Ok(())
        }
    }
}

/// A transition requested during event dispatch, held until the dispatch
/// completes.
enum DeferredOp {
    Goto {
        target: StateId,
        label: Label,
        force_events: bool,
    },
    Push {
        target: StateId,
        label: Label,
    },
    /// Pop or End of the stack top.
    Remove { action: StateAction },
}

/// Clears the per-dispatch flags on every exit path, including panics in
/// user hooks.
struct DispatchGuard<'a> {
    core: &'a FsmCore,
    slot: &'a StateSlot,
}

impl<'a> DispatchGuard<'a> {
    fn new(core: &'a FsmCore, slot: &'a StateSlot) -> Self {
        core.dispatch_depth.set(core.dispatch_depth.get() + 1);
        slot.dispatching.set(true);
        DispatchGuard { core, slot }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.core.dispatch_depth.set(self.core.dispatch_depth.get() - 1);
        self.slot.dispatching.set(false);
    }
}

struct ActivationGuard<'a>(&'a StateSlot);

impl<'a> ActivationGuard<'a> {
    fn new(slot: &'a StateSlot) -> Self {
        slot.activating_label.set(true);
        ActivationGuard(slot)
    }
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        self.0.activating_label.set(false);
    }
}

/// The shared interior of a machine. Owned by [`FiniteStateMachine`] and
/// reached through weak references from contexts and latent futures.
pub(crate) struct FsmCore {
    weak_self: Weak<FsmCore>,
    slots: RefCell<Vec<Rc<StateSlot>>>,
    stack: RefCell<Vec<StateId>>,
    global: Cell<Option<StateId>>,
    initial: RefCell<Option<(StateId, Label)>>,
    initialized: Cell<bool>,
    active: Cell<bool>,
    begun: Cell<bool>,
    destroyed: Cell<bool>,
    time: Cell<f64>,
    ticks: Cell<u64>,
    dispatch_depth: Cell<u32>,
    deferred: RefCell<Option<DeferredOp>>,
    replaying: Cell<bool>,
    queue: RefCell<VecDeque<PendingPushRequest>>,
    next_request_id: Cell<u64>,
    history: RefCell<ActionHistory>,
    sweep_interval: Cell<f64>,
    next_sweep: Cell<f64>,
    push_waiters: RefCell<Vec<(StateId, Rc<Cell<bool>>)>>,
}

impl FsmCore {
    fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| FsmCore {
            weak_self: weak.clone(),
            slots: RefCell::new(Vec::new()),
            stack: RefCell::new(Vec::new()),
            global: Cell::new(None),
            initial: RefCell::new(None),
            initialized: Cell::new(false),
            active: Cell::new(false),
            begun: Cell::new(false),
            destroyed: Cell::new(false),
            time: Cell::new(0.0),
            ticks: Cell::new(0),
            dispatch_depth: Cell::new(0),
            deferred: RefCell::new(None),
            replaying: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
            next_request_id: Cell::new(0),
            history: RefCell::new(ActionHistory::new()),
            sweep_interval: Cell::new(DEFAULT_SWEEP_INTERVAL),
            next_sweep: Cell::new(DEFAULT_SWEEP_INTERVAL),
            push_waiters: RefCell::new(Vec::new()),
        })
    }

    // --- registry --------------------------------------------------------

    pub(crate) fn find_slot(&self, id: StateId) -> Option<Rc<StateSlot>> {
        self.slots
            .borrow()
            .iter()
            .find(|slot| slot.id == id)
            .cloned()
    }

    /// Lookup that must succeed: the id came from the stack or the global
    /// field, both of which only ever hold registered states.
    fn checked_slot(&self, id: StateId) -> Rc<StateSlot> {
        self.find_slot(id)
            .unwrap_or_else(|| panic!("state {id} missing from the registry"))
    }

    fn register_slot(&self, slot: StateSlot) -> Result<(), BuildError> {
        if self.find_slot(slot.id).is_some() {
            warn!(state = %slot.id, "state is already registered");
            return Err(BuildError::DuplicateState(slot.id));
        }
        info!(state = %slot.id, labels = slot.labels.len(), "registered state");
        self.slots.borrow_mut().push(Rc::new(slot));
        Ok(())
    }

    fn is_registered(&self, id: StateId) -> bool {
        self.find_slot(id).is_some()
    }

    // --- queries ---------------------------------------------------------

    pub(crate) fn active_id(&self) -> Option<StateId> {
        self.stack.borrow().last().copied()
    }

    fn active_slot(&self) -> Option<Rc<StateSlot>> {
        self.active_id().map(|id| self.checked_slot(id))
    }

    pub(crate) fn stack_snapshot(&self) -> Vec<StateId> {
        self.stack.borrow().clone()
    }

    pub(crate) fn game_time(&self) -> f64 {
        self.time.get()
    }

    pub(crate) fn global_state_id(&self) -> Option<StateId> {
        self.global.get()
    }

    pub(crate) fn registered_slots(&self) -> Vec<Rc<StateSlot>> {
        self.slots.borrow().clone()
    }

    pub(crate) fn history_records(&self) -> Vec<ActionRecord> {
        self.history.borrow().records().cloned().collect()
    }

    pub(crate) fn tick_count(&self) -> u64 {
        self.ticks.get()
    }

    fn check_operational(&self) -> Result<(), TransitionError> {
        if !self.initialized.get() || self.destroyed.get() {
            warn!("operation rejected: the state machine is not initialized");
            return Err(TransitionError::NotInitialized);
        }
        Ok(())
    }

    fn transition_in_flight(&self) -> bool {
        self.deferred.borrow().is_some()
    }

    // --- dispatch --------------------------------------------------------

    /// Delivers one lifecycle action to one state, then performs the
    /// orchestrator's bookkeeping: removal cleanup, last-action tracking and
    /// the bounded history record.
    fn dispatch(&self, slot: &Rc<StateSlot>, action: StateAction, other: Option<StateId>) {
        assert!(
            !slot.is_global || matches!(action, StateAction::Begin | StateAction::End),
            "global state {} cannot receive {action}",
            slot.id
        );
        if action.activates() {
            slot.is_active.set(true);
        }
        {
            let _guard = DispatchGuard::new(self, slot);
            let ctx = StateContext::new(self.weak_self.clone(), slot.id);
            let mut behavior = slot.behavior.borrow_mut();
            match action {
                StateAction::Begin => behavior.on_began(&ctx, other),
                StateAction::End => behavior.on_ended(&ctx, other),
                StateAction::Push => behavior.on_pushed(&ctx, other),
                StateAction::Pop => behavior.on_popped(&ctx, other),
                StateAction::Resume => behavior.on_resumed(&ctx, other),
                StateAction::Pause => behavior.on_paused(&ctx, other),
            }
        }
        if action.deactivates() {
            slot.is_active.set(false);
        }
        if action.removes_from_stack() {
            // Framework-owned cleanup; holds regardless of hook overrides.
            slot.unit.borrow_mut().reset();
        }
        let now = self.time.get();
        slot.last_action.set(Some((action, now)));
        self.history.borrow_mut().record(ActionRecord {
            state: slot.id,
            action,
            at: now,
            timestamp: Utc::now(),
        });
        debug!(state = %slot.id, action = %action, "delivered lifecycle action");
    }

    /// Applies deferred transitions once no dispatch is in progress. Looped:
    /// applying one may defer another from within its own hooks.
    fn drain_deferred(&self) {
        if self.dispatch_depth.get() > 0 {
            return;
        }
        loop {
            let op = self.deferred.borrow_mut().take();
            let Some(op) = op else { break };
            debug!("applying deferred transition");
            match op {
                DeferredOp::Goto {
                    target,
                    label,
                    force_events,
                } => self.apply_goto(target, label, force_events),
                DeferredOp::Push { target, label } => self.apply_push(target, label),
                DeferredOp::Remove { action } => self.apply_remove(action),
            }
        }
    }

    // --- transitions -----------------------------------------------------

    pub(crate) fn goto_state(
        &self,
        target: StateId,
        label: Label,
        force_events: bool,
    ) -> Result<(), TransitionError> {
        self.check_operational()?;
        if self.transition_in_flight() {
            warn!(state = %target, "goto rejected: another transition is already in flight");
            return Err(TransitionError::TransitionInFlight);
        }
        if self.global.get() == Some(target) {
            warn!(state = %target, "goto rejected: target is the global state");
            return Err(TransitionError::GlobalStateTarget(target));
        }
        if !self.is_registered(target) {
            warn!(state = %target, "goto rejected: target is not registered");
            return Err(TransitionError::NotRegistered(target));
        }
        if !label.is_valid_tag() {
            warn!(state = %target, label = %label, "goto rejected: malformed label tag");
            return Err(TransitionError::InvalidLabel(label));
        }
        {
            let stack = self.stack.borrow();
            if stack.contains(&target) && stack.last() != Some(&target) {
                warn!(state = %target, "goto rejected: target is buried in the stack");
                return Err(TransitionError::StateInStackBelowTop(target));
            }
        }
        if let Some(active) = self.active_slot() {
            if active.id != target && active.blocked.contains(&target) {
                warn!(from = %active.id, to = %target, "goto rejected by block-list");
                return Err(TransitionError::Blocked {
                    from: active.id,
                    to: target,
                });
            }
            if let Err(reason) = active.can_safely_deactivate() {
                warn!(state = %active.id, reason = %reason, "goto rejected: active state cannot deactivate");
                return Err(TransitionError::CannotDeactivate {
                    state: active.id,
                    reason,
                });
            }
        }
        if self.dispatch_depth.get() > 0 {
            debug!(state = %target, "goto requested during dispatch; deferring");
            *self.deferred.borrow_mut() = Some(DeferredOp::Goto {
                target,
                label,
                force_events,
            });
            return Ok(());
        }
        self.apply_goto(target, label, force_events);
        self.drain_deferred();
        Ok(())
    }

    fn apply_goto(&self, target: StateId, label: Label, force_events: bool) {
        let outgoing = self.active_id();
        if outgoing == Some(target) && !force_events {
            debug!(state = %target, "goto to the active state without forced events; nothing to do");
            return;
        }
        if let Some(out_id) = outgoing {
            self.stack.borrow_mut().pop();
            let out = self.checked_slot(out_id);
            self.dispatch(&out, StateAction::End, Some(target));
            self.notify_removed(out_id);
        }
        self.enter(target, label, StateAction::Begin, outgoing);
        self.replay_queue();
    }

    pub(crate) fn push_state(
        &self,
        target: StateId,
        label: Label,
    ) -> Result<PushWait, TransitionError> {
        self.check_operational()?;
        if self.transition_in_flight() {
            warn!(state = %target, "push rejected: another transition is already in flight");
            return Err(TransitionError::TransitionInFlight);
        }
        if self.global.get() == Some(target) {
            warn!(state = %target, "push rejected: target is the global state");
            return Err(TransitionError::GlobalStateTarget(target));
        }
        if !self.is_registered(target) {
            warn!(state = %target, "push rejected: target is not registered");
            return Err(TransitionError::NotRegistered(target));
        }
        if !label.is_valid_tag() {
            warn!(state = %target, label = %label, "push rejected: malformed label tag");
            return Err(TransitionError::InvalidLabel(label));
        }
        if self.stack.borrow().contains(&target) {
            warn!(state = %target, "push rejected: target is already present in the stack");
            return Err(TransitionError::AlreadyInStack(target));
        }
        if self.dispatch_depth.get() > 0 {
            debug!(state = %target, "push requested during dispatch; deferring");
            *self.deferred.borrow_mut() = Some(DeferredOp::Push { target, label });
            return Ok(self.make_push_waiter(target));
        }
        self.apply_push(target, label);
        let wait = self.make_push_waiter(target);
        self.drain_deferred();
        Ok(wait)
    }

    fn apply_push(&self, target: StateId, label: Label) {
        let previous = self.active_id();
        if let Some(prev_id) = previous {
            let prev = self.checked_slot(prev_id);
            self.dispatch(&prev, StateAction::Pause, Some(target));
        }
        self.enter(target, label, StateAction::Push, previous);
        self.replay_queue();
    }

    /// Places `target` on top of the stack and fires its entry action. The
    /// requested label degrades to the default with a warning when no
    /// routine is registered for it.
    fn enter(&self, target: StateId, label: Label, action: StateAction, other: Option<StateId>) {
        let slot = self.checked_slot(target);
        {
            let mut unit = slot.unit.borrow_mut();
            unit.active_label = if label == Label::DEFAULT || slot.labels.contains(&label) {
                label
            } else {
                warn!(state = %target, label = %label, "label is not registered; falling back to the default");
                Label::DEFAULT
            };
            unit.activated = false;
        }
        self.stack.borrow_mut().push(target);
        self.dispatch(&slot, action, other);
    }

    pub(crate) fn remove_top(&self, action: StateAction) -> Result<(), TransitionError> {
        debug_assert!(action.removes_from_stack());
        self.check_operational()?;
        if self.transition_in_flight() {
            warn!("pop rejected: another transition is already in flight");
            return Err(TransitionError::TransitionInFlight);
        }
        let Some(top) = self.active_id() else {
            warn!("pop rejected: the state stack is empty");
            return Err(TransitionError::EmptyStack);
        };
        let slot = self.checked_slot(top);
        if let Err(reason) = slot.can_safely_deactivate() {
            warn!(state = %top, reason = %reason, "pop rejected: active state cannot deactivate");
            return Err(TransitionError::CannotDeactivate { state: top, reason });
        }
        if self.dispatch_depth.get() > 0 {
            debug!(state = %top, action = %action, "removal requested during dispatch; deferring");
            *self.deferred.borrow_mut() = Some(DeferredOp::Remove { action });
            return Ok(());
        }
        self.apply_remove(action);
        self.drain_deferred();
        Ok(())
    }

    fn apply_remove(&self, action: StateAction) {
        let Some(top) = self.stack.borrow_mut().pop() else {
            return;
        };
        let next = self.active_id();
        let slot = self.checked_slot(top);
        self.dispatch(&slot, action, next);
        self.notify_removed(top);
        if let Some(next_id) = next {
            let next_slot = self.checked_slot(next_id);
            self.dispatch(&next_slot, StateAction::Resume, Some(top));
        }
        self.replay_queue();
    }

    pub(crate) fn clear_stack(&self) -> usize {
        let mut ended = 0;
        loop {
            if self.stack.borrow().is_empty() {
                break;
            }
            if self.dispatch_depth.get() > 0 {
                warn!("clear_stack aborted: a lifecycle dispatch is in progress");
                break;
            }
            if self.remove_top(StateAction::End).is_err() {
                break;
            }
            ended += 1;
        }
        ended
    }

    // --- pending push queue ----------------------------------------------

    pub(crate) fn push_state_queued(
        &self,
        target: StateId,
        label: Label,
    ) -> Result<PushRequestHandle, TransitionError> {
        if self.destroyed.get() {
            return Err(TransitionError::NotInitialized);
        }
        if self.global.get() == Some(target) {
            warn!(state = %target, "queued push rejected: target is the global state");
            return Err(TransitionError::GlobalStateTarget(target));
        }
        if !label.is_valid_tag() {
            warn!(state = %target, label = %label, "queued push rejected: malformed label tag");
            return Err(TransitionError::InvalidLabel(label));
        }
        let id = self.next_request_id.get();
        self.next_request_id.set(id + 1);
        let shared = RequestShared::new();
        let request = PendingPushRequest {
            id,
            target,
            label,
            shared: Rc::clone(&shared),
        };
        if self.can_apply_queued(&request) {
            // Success is broadcast before the push executes.
            shared.resolve(PushResult::Success);
            self.apply_push(target, request.label);
            self.drain_deferred();
        } else {
            debug!(request = id, state = %target, "push request queued");
            self.queue.borrow_mut().push_back(request);
        }
        Ok(PushRequestHandle::new(
            id,
            target,
            shared,
            self.weak_self.clone(),
        ))
    }

    /// Whether a queued push could apply right now. Unlike the direct push
    /// path this also honors the departing state's block-list: blocked
    /// pushes are always deferred to the queue rather than failed.
    fn can_apply_queued(&self, request: &PendingPushRequest) -> bool {
        if !self.initialized.get()
            || self.destroyed.get()
            || self.transition_in_flight()
            || self.dispatch_depth.get() > 0
            || !self.is_registered(request.target)
            || self.stack.borrow().contains(&request.target)
        {
            return false;
        }
        match self.active_slot() {
            Some(active) => !active.blocked.contains(&request.target),
            None => true,
        }
    }

    /// Replays the head of the pending queue. Called after every stack
    /// change; strictly FIFO, only the head is ever attempted.
    fn replay_queue(&self) {
        if self.replaying.get() {
            return;
        }
        self.replaying.set(true);
        loop {
            let applicable = {
                let queue = self.queue.borrow();
                match queue.front() {
                    Some(front) => self.can_apply_queued(front),
                    None => false,
                }
            };
            if !applicable {
                break;
            }
            let request = self
                .queue
                .borrow_mut()
                .pop_front()
                .expect("queue head vanished during replay");
            info!(request = request.id, state = %request.target, "applying queued push request");
            request.shared.resolve(PushResult::Success);
            self.apply_push(request.target, request.label);
        }
        self.replaying.set(false);
    }

    pub(crate) fn cancel_push_request(&self, id: u64) -> bool {
        let removed = {
            let mut queue = self.queue.borrow_mut();
            let before = queue.len();
            queue.retain(|request| {
                if request.id == id {
                    request.shared.resolve(PushResult::Canceled);
                    false
                } else {
                    true
                }
            });
            before != queue.len()
        };
        if removed {
            debug!(request = id, "canceled queued push request");
        }
        removed
    }

    fn pending_count(&self) -> usize {
        self.queue.borrow().len()
    }

    fn make_push_waiter(&self, target: StateId) -> PushWait {
        let done = Rc::new(Cell::new(false));
        self.push_waiters
            .borrow_mut()
            .push((target, Rc::clone(&done)));
        PushWait::new(self.weak_self.clone(), done)
    }

    fn notify_removed(&self, id: StateId) {
        self.push_waiters.borrow_mut().retain(|(target, done)| {
            if *target == id {
                done.set(true);
                false
            } else {
                true
            }
        });
    }

    // --- labels and latent executions ------------------------------------

    pub(crate) fn goto_label_on(
        &self,
        slot: &Rc<StateSlot>,
        label: Label,
    ) -> Result<(), TransitionError> {
        self.check_operational()?;
        if !label.is_valid_tag() {
            warn!(state = %slot.id, label = %label, "goto_label rejected: malformed label tag");
            return Err(TransitionError::InvalidLabel(label));
        }
        if !slot.labels.contains(&label) {
            warn!(state = %slot.id, label = %label, "goto_label rejected: label is not registered");
            return Err(TransitionError::UnknownLabel(label, slot.id));
        }
        let mut unit = slot.unit.borrow_mut();
        unit.stop_running_labels();
        unit.stop_latent_executions();
        unit.active_label = label;
        unit.activated = false;
        trace!(state = %slot.id, label = %unit.active_label, "switched active label");
        Ok(())
    }

    pub(crate) fn stop_every_latent_execution(&self) -> usize {
        let slots = self.slots.borrow().clone();
        let stopped: usize = slots
            .iter()
            .map(|slot| slot.unit.borrow_mut().stop_latent_executions())
            .sum();
        if stopped > 0 {
            debug!(count = stopped, "stopped latent executions");
        }
        stopped
    }

    /// Instantiates the active label of `slot` if it has not started since
    /// it became active, and runs it to its first suspension point. The
    /// activation guard makes ending the state during start-up a rejected
    /// operation rather than label-table corruption.
    fn activate_pending_label(&self, slot: &Rc<StateSlot>) {
        if slot.destroyed.get() {
            return;
        }
        let label = {
            let mut unit = slot.unit.borrow_mut();
            if unit.activated {
                return;
            }
            unit.activated = true;
            unit.active_label.clone()
        };
        let ctx = StateContext::new(self.weak_self.clone(), slot.id);
        let Some(mut future) = slot.labels.instantiate(&label, ctx) else {
            // The default label with no registered routine is an empty
            // routine.
            return;
        };
        trace!(state = %slot.id, label = %label, "activating label");
        let ready = {
            let _guard = ActivationGuard::new(slot);
            poll_unit(&mut future).is_ready()
        };
        if ready {
            return;
        }
        let mut unit = slot.unit.borrow_mut();
        // The body may have switched labels during start-up; the routine is
        // then discarded and the new label starts on the next tick.
        if unit.activated && unit.active_label == label {
            unit.insert_running(self.ticks.get(), future);
        }
    }

    fn poll_running_labels(&self, slot: &Rc<StateSlot>, tick: u64) {
        if slot.destroyed.get() {
            return;
        }
        let ids = slot.unit.borrow().pollable_ids(tick);
        for id in ids {
            let Some(mut future) = slot.unit.borrow_mut().take_future(id) else {
                continue;
            };
            let ready = poll_unit(&mut future).is_ready();
            let mut unit = slot.unit.borrow_mut();
            if ready {
                unit.remove_running(id);
            } else {
                // Returns false if the body triggered cleanup of its own
                // state; the routine is then dropped here.
                unit.restore_future(id, future);
            }
        }
    }

    fn sweep_cancellers(&self) {
        let slots = self.slots.borrow().clone();
        let swept: usize = slots
            .iter()
            .map(|slot| slot.unit.borrow_mut().sweep_cancellers())
            .sum();
        if swept > 0 {
            trace!(count = swept, "swept resolved latent-execution cancellers");
        }
    }

    // --- lifecycle -------------------------------------------------------

    fn initialize(&self) -> Result<(), BuildError> {
        if self.initialized.get() {
            return Err(BuildError::AlreadyInitialized);
        }
        let initial = self.initial.borrow().clone();
        if let Some((id, label)) = initial {
            if self.global.get() == Some(id) {
                return Err(BuildError::GlobalStateInStack(id));
            }
            if !self.is_registered(id) {
                return Err(BuildError::UnknownState(id));
            }
            if !label.is_valid_tag() {
                return Err(BuildError::InvalidLabel(label));
            }
        }
        self.initialized.set(true);
        info!("state machine initialized");
        if self.active.get() {
            self.begin_active_states();
        }
        Ok(())
    }

    /// Fires `Begin` on the global state, then pushes and begins the
    /// configured initial state. Runs once, the first time the machine is
    /// both initialized and active. A state entered before activation takes
    /// precedence: the initial state is skipped when the stack is already
    /// non-empty, and the pending push queue replays once begin completes.
    fn begin_active_states(&self) {
        if self.begun.get() {
            return;
        }
        self.begun.set(true);
        info!("beginning active states");
        if let Some(global_id) = self.global.get() {
            let global = self.checked_slot(global_id);
            self.dispatch(&global, StateAction::Begin, None);
            self.drain_deferred();
        }
        let initial = self.initial.borrow().clone();
        if let Some((id, label)) = initial {
            if self.stack.borrow().is_empty() {
                self.enter(id, label, StateAction::Begin, None);
                self.drain_deferred();
            }
        }
        self.replay_queue();
    }

    fn set_active(&self, active: bool) {
        if self.destroyed.get() || active == self.active.get() {
            return;
        }
        self.active.set(active);
        if active {
            if self.initialized.get() && !self.begun.get() {
                self.begin_active_states();
                return;
            }
            if self.begun.get() {
                if let Some(slot) = self.active_slot() {
                    self.dispatch(&slot, StateAction::Resume, None);
                    self.drain_deferred();
                }
            }
        } else if self.begun.get() {
            if let Some(slot) = self.active_slot() {
                self.dispatch(&slot, StateAction::Pause, None);
                self.drain_deferred();
            }
            // Dropped label bodies restart from scratch once reactivated.
            let slots = self.slots.borrow().clone();
            for slot in &slots {
                slot.unit.borrow_mut().stop_running_labels();
            }
        }
    }

    fn tick(&self, delta_seconds: f64) {
        if !self.initialized.get() || !self.active.get() || self.destroyed.get() {
            return;
        }
        self.time.set(self.time.get() + delta_seconds);
        self.ticks.set(self.ticks.get() + 1);
        let tick = self.ticks.get();

        if let Some(global_id) = self.global.get() {
            let global = self.checked_slot(global_id);
            self.activate_pending_label(&global);
        }
        if let Some(slot) = self.active_slot() {
            self.activate_pending_label(&slot);
        }

        let slots = self.slots.borrow().clone();
        for slot in &slots {
            self.poll_running_labels(slot, tick);
        }

        if self.time.get() >= self.next_sweep.get() {
            self.sweep_cancellers();
            self.next_sweep
                .set(self.time.get() + self.sweep_interval.get());
        }
        self.drain_deferred();
    }

    pub(crate) fn shutdown(&self) {
        if self.destroyed.get() {
            return;
        }
        info!("shutting down state machine");
        // Cancel queued requests first so teardown stack changes cannot
        // replay them.
        let pending: Vec<PendingPushRequest> = self.queue.borrow_mut().drain(..).collect();
        for request in &pending {
            request.shared.resolve(PushResult::Canceled);
        }
        if self.begun.get() {
            if let Some(global_id) = self.global.get() {
                let global = self.checked_slot(global_id);
                self.dispatch(&global, StateAction::End, None);
                self.drain_deferred();
            }
            loop {
                if self.stack.borrow().is_empty() || self.dispatch_depth.get() > 0 {
                    break;
                }
                self.apply_remove(StateAction::End);
                self.drain_deferred();
            }
        }
        self.destroyed.set(true);
        let slots = self.slots.borrow().clone();
        for slot in &slots {
            let mut unit = slot.unit.borrow_mut();
            unit.stop_latent_executions();
            unit.stop_running_labels();
            slot.destroyed.set(true);
            slot.is_active.set(false);
        }
        let waiters: Vec<(StateId, Rc<Cell<bool>>)> =
            self.push_waiters.borrow_mut().drain(..).collect();
        for (_, done) in waiters {
            done.set(true);
        }
    }
}

/// A hierarchical, stack-based finite state machine.
///
/// One machine owns zero or one global supervisory state plus a LIFO stack
/// of normal states, of which only the top-most is actively executing. The
/// host drives it with [`tick`](Self::tick); states drive transitions
/// through their [`StateContext`].
///
/// # Example
///
/// ```
/// use stackfsm::{FiniteStateMachine, Label, MachineState};
///
/// struct Idle;
/// impl MachineState for Idle {}
///
/// struct Working;
/// impl MachineState for Working {}
///
/// let mut fsm = FiniteStateMachine::builder()
///     .state(Idle)
///     .state(Working)
///     .initial_state::<Idle>(Label::DEFAULT)
///     .build()
///     .unwrap();
/// fsm.set_active(true);
///
/// assert!(fsm.is_in_state::<Idle>());
/// fsm.goto_state::<Working>(Label::DEFAULT, false).unwrap();
/// assert!(fsm.is_in_state::<Working>());
/// fsm.tick(0.016);
/// ```
pub struct FiniteStateMachine {
    core: Rc<FsmCore>,
}

impl FiniteStateMachine {
    /// An inert machine with nothing registered or configured.
    pub fn new() -> Self {
        FiniteStateMachine {
            core: FsmCore::new(),
        }
    }

    /// Fluent configuration; see [`FsmBuilder`].
    pub fn builder() -> FsmBuilder {
        FsmBuilder::new()
    }

    // --- configuration and registration ----------------------------------

    /// Registers `state` as a normal (stack-participating) state. Allowed
    /// both before and after initialization; each concrete type at most
    /// once.
    pub fn register_state<S: MachineState>(&mut self, state: S) -> Result<(), BuildError> {
        self.core.register_slot(StateSlot::new(state, false))
    }

    /// Registers `state` as the machine's global supervisory state. Only
    /// before initialization, and only once.
    pub fn set_global_state<S: GlobalState>(&mut self, state: S) -> Result<(), BuildError> {
        if self.core.initialized.get() {
            return Err(BuildError::AlreadyInitialized);
        }
        let id = StateId::of::<S>();
        if self.core.global.get().is_some() {
            return Err(BuildError::DuplicateState(id));
        }
        self.core.register_slot(StateSlot::new(state, true))?;
        self.core.global.set(Some(id));
        Ok(())
    }

    /// Configures the state pushed when active states begin, and the label
    /// it starts at. Only before initialization.
    pub fn set_initial_state<S: MachineState>(&mut self, label: Label) -> Result<(), BuildError> {
        if self.core.initialized.get() {
            return Err(BuildError::AlreadyInitialized);
        }
        if !label.is_valid_tag() {
            return Err(BuildError::InvalidLabel(label));
        }
        *self.core.initial.borrow_mut() = Some((StateId::of::<S>(), label));
        Ok(())
    }

    /// Configures the game-time interval between sweeps of resolved
    /// latent-execution cancellers. Only before initialization.
    pub fn set_canceller_sweep_interval(&mut self, seconds: f64) -> Result<(), BuildError> {
        if self.core.initialized.get() {
            return Err(BuildError::AlreadyInitialized);
        }
        self.core.sweep_interval.set(seconds);
        self.core.next_sweep.set(seconds);
        Ok(())
    }

    /// Validates the configuration and marks the machine initialized. If
    /// the machine is already active, active states begin immediately.
    pub fn initialize(&mut self) -> Result<(), BuildError> {
        self.core.initialize()
    }

    // --- host integration ------------------------------------------------

    /// The host's enabled toggle. The first time the machine is both
    /// initialized and active, the global state and the configured initial
    /// state begin. Deactivating pauses the active normal state and stops
    /// running labels; reactivating resumes it.
    pub fn set_active(&mut self, active: bool) {
        self.core.set_active(active);
    }

    pub fn is_active(&self) -> bool {
        self.core.active.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.core.initialized.get()
    }

    /// Advances game time, activates pending labels of the global and
    /// active states, polls every running label once, and runs the
    /// canceller sweep when due. Ignored until initialized and active.
    pub fn tick(&mut self, delta_seconds: f64) {
        self.core.tick(delta_seconds);
    }

    /// Ends the global state, drains the stack, cancels queued push
    /// requests and all latent work, and marks every state destroyed.
    /// Performed automatically on drop.
    pub fn shutdown(&mut self) {
        self.core.shutdown();
    }

    // --- transitions -----------------------------------------------------

    /// Replaces the active state with `T`: the stack top is popped without
    /// an event, the outgoing state receives `End`, `T` is pushed and
    /// receives `Begin` forwarded to `label`. A goto to the already-active
    /// type is a no-op unless `force_events` is set.
    pub fn goto_state<T: MachineState>(
        &mut self,
        label: Label,
        force_events: bool,
    ) -> Result<(), TransitionError> {
        self.core.goto_state(StateId::of::<T>(), label, force_events)
    }

    /// Pushes `T` on top of the active state, pausing it. The returned
    /// [`PushWait`] resolves once `T` has left the stack again; awaiting it
    /// is optional.
    pub fn push_state<T: MachineState>(&mut self, label: Label) -> Result<PushWait, TransitionError> {
        self.core.push_state(StateId::of::<T>(), label)
    }

    /// Like [`push_state`](Self::push_state), but a push that cannot
    /// currently be satisfied is enqueued instead of failed and retried
    /// (strictly FIFO, head only) whenever the stack changes.
    pub fn push_state_queued<T: MachineState>(
        &mut self,
        label: Label,
    ) -> Result<PushRequestHandle, TransitionError> {
        self.core.push_state_queued(StateId::of::<T>(), label)
    }

    /// Pops the active state: it receives `Pop`, and the uncovered state
    /// (if any) receives `Resume`.
    pub fn pop_state(&mut self) -> Result<(), TransitionError> {
        self.core.remove_top(StateAction::Pop)
    }

    /// Like [`pop_state`](Self::pop_state) but delivers `End` instead of
    /// `Pop`; used for forced termination.
    pub fn end_state(&mut self) -> Result<(), TransitionError> {
        self.core.remove_top(StateAction::End)
    }

    /// Repeatedly ends the stack top until the stack is empty or a dispatch
    /// is in progress. Returns the count of states ended.
    pub fn clear_stack(&mut self) -> usize {
        self.core.clear_stack()
    }

    /// Switches the active state's label; it starts fresh on the next tick.
    pub fn goto_label(&mut self, label: Label) -> Result<(), TransitionError> {
        self.core.check_operational()?;
        let Some(slot) = self.core.active_slot() else {
            warn!("goto_label rejected: no state is currently active");
            return Err(TransitionError::NoActiveState);
        };
        self.core.goto_label_on(&slot, label)
    }

    /// Fires every pending latent-execution cancel trigger across all
    /// registered states; returns the count canceled.
    pub fn stop_every_latent_execution(&mut self) -> usize {
        self.core.stop_every_latent_execution()
    }

    // --- queries ---------------------------------------------------------

    /// The currently active state (the stack top), if any.
    pub fn active_state(&self) -> Option<StateId> {
        self.core.active_id()
    }

    /// The configured global state, if any.
    pub fn global_state(&self) -> Option<StateId> {
        self.core.global.get()
    }

    /// The stack, bottom to top.
    pub fn stack(&self) -> Vec<StateId> {
        self.core.stack_snapshot()
    }

    /// True if `T` is the currently active state.
    pub fn is_in_state<T: MachineState>(&self) -> bool {
        self.active_state() == Some(StateId::of::<T>())
    }

    /// True if `T` is anywhere in the stack.
    pub fn is_in_stack<T: MachineState>(&self) -> bool {
        self.core.stack.borrow().contains(&StateId::of::<T>())
    }

    pub fn is_state_registered<T: MachineState>(&self) -> bool {
        self.core.is_registered(StateId::of::<T>())
    }

    /// Every registered state, in registration order.
    pub fn registered_states(&self) -> Vec<StateId> {
        self.core.slots.borrow().iter().map(|slot| slot.id).collect()
    }

    /// The data object of state `S`, if it exists and is of type `D`.
    /// Returns `None` with a diagnostic on any mismatch; never panics.
    pub fn state_data<S: MachineState, D: 'static>(&self) -> Option<Rc<D>> {
        let slot = self.core.find_slot(StateId::of::<S>())?;
        let Some(data) = slot.data.clone() else {
            warn!(state = %slot.id, "state has no data object");
            return None;
        };
        match Rc::downcast::<D>(data) {
            Ok(data) => Some(data),
            Err(_) => {
                warn!(
                    state = %slot.id,
                    requested = std::any::type_name::<D>(),
                    "state data object is of a different type"
                );
                None
            }
        }
    }

    /// Accumulated game time in seconds.
    pub fn time(&self) -> f64 {
        self.core.game_time()
    }

    /// The bounded history of delivered lifecycle actions, oldest first.
    pub fn history(&self) -> ActionHistory {
        self.core.history.borrow().clone()
    }

    /// Queued push requests not yet applied or canceled.
    pub fn pending_push_requests(&self) -> usize {
        self.core.pending_count()
    }

    /// A read-only snapshot for debugging overlays.
    pub fn snapshot(&self) -> FsmSnapshot {
        FsmSnapshot::capture(&self.core)
    }
}

impl Default for FiniteStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FiniteStateMachine {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}
