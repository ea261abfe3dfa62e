//! The behavior trait implemented by every machine state.

use std::any::Any;
use std::rc::Rc;

use crate::core::StateId;
use crate::machine::{LabelRegistry, StateContext};

/// One unit of behavior owned by a [`FiniteStateMachine`](crate::FiniteStateMachine).
///
/// States are identified by their concrete type: each type is registered at
/// most once per machine, appears in the stack at most once, and is the
/// target of transitions (`goto_state::<T>`, `push_state::<T>`). All methods
/// have defaults, so the minimal state is an empty struct:
///
/// ```
/// use stackfsm::MachineState;
///
/// struct Idle;
/// impl MachineState for Idle {}
/// ```
///
/// # Lifecycle hooks
///
/// The orchestrator delivers six lifecycle actions, each through its own
/// notification (`on_began`, `on_ended`, `on_pushed`, `on_popped`,
/// `on_resumed`, `on_paused`). Their default bodies compose four semantic
/// callbacks:
///
/// - [`on_added_to_stack`](Self::on_added_to_stack) /
///   [`on_removed_from_stack`](Self::on_removed_from_stack) track stack
///   membership (Begin/Push vs End/Pop).
/// - [`on_activated`](Self::on_activated) /
///   [`on_deactivated`](Self::on_deactivated) track whether this state is
///   the one currently ticking (Begin/Push/Resume vs End/Pop/Pause).
///
/// Override either layer. When a state leaves the stack the framework stops
/// its running labels and latent executions and resets the active label to
/// [`Label::DEFAULT`](crate::Label::DEFAULT) after the hook returns, so the
/// cleanup invariant holds regardless of what an override does.
///
/// The payload on the deactivation side is the incoming state (`None` when
/// the stack empties); on the activation side it is the outgoing state
/// (`None` when there was none).
///
/// # Labels
///
/// Per-frame behavior lives in labels: named cooperative routines registered
/// in [`register_labels`](Self::register_labels) and driven by the machine's
/// tick. A label body is an `async` block capturing a [`StateContext`]; it
/// never borrows the state value itself. Mutable state shared between hooks
/// and label bodies belongs in the data object returned by
/// [`create_data`](Self::create_data).
///
/// ```
/// use stackfsm::{Label, LabelRegistry, MachineState, StateContext};
///
/// const SWEEP: Label = Label::from_static("Label.Sweep");
///
/// struct Patrol;
///
/// impl MachineState for Patrol {
///     fn register_labels(&self, registry: &mut LabelRegistry) {
///         registry.add(SWEEP, |ctx: StateContext| async move {
///             loop {
///                 ctx.run_latent(ctx.sleep(2.0)).await;
///             }
///         });
///     }
/// }
/// ```
pub trait MachineState: 'static {
    /// Registers this state's label routines. Called once at registration.
    fn register_labels(&self, _registry: &mut LabelRegistry) {}

    /// State types this state forbids `goto_state` transitions into while it
    /// is active. Collected once at registration.
    fn blocked_transitions(&self) -> Vec<StateId> {
        Vec::new()
    }

    /// Builds this state's data object. Called once at registration; the
    /// machine stores the value and hands it out through
    /// [`StateContext::data`] and typed `state_data` queries.
    fn create_data(&self) -> Option<Rc<dyn Any>> {
        None
    }

    /// Free-form diagnostic text included in snapshots. Empty means omitted.
    fn debug_data(&self) -> String {
        String::new()
    }

    /// The state entered the stack (Begin or Push).
    fn on_added_to_stack(&mut self, _ctx: &StateContext, _other: Option<StateId>) {}

    /// The state left the stack (End or Pop).
    fn on_removed_from_stack(&mut self, _ctx: &StateContext, _other: Option<StateId>) {}

    /// The state became the one currently ticking (Begin, Push or Resume).
    fn on_activated(&mut self, _ctx: &StateContext, _other: Option<StateId>) {}

    /// The state stopped being the one currently ticking (End, Pop or
    /// Pause).
    fn on_deactivated(&mut self, _ctx: &StateContext, _other: Option<StateId>) {}

    /// `Begin` was delivered: the state entered the stack through a goto or
    /// as the configured initial state. `previous` is the state replaced by
    /// a goto, if any.
    fn on_began(&mut self, ctx: &StateContext, previous: Option<StateId>) {
        self.on_added_to_stack(ctx, previous);
        self.on_activated(ctx, previous);
    }

    /// `End` was delivered: the state left the stack through a goto, an
    /// explicit end, or teardown. `next` is the incoming state, if any.
    /// Deactivation only fires if the state was active at that moment.
    fn on_ended(&mut self, ctx: &StateContext, next: Option<StateId>) {
        if ctx.is_active() {
            self.on_deactivated(ctx, next);
        }
        self.on_removed_from_stack(ctx, next);
    }

    /// `Push` was delivered: the state entered the stack on top of `paused`.
    fn on_pushed(&mut self, ctx: &StateContext, paused: Option<StateId>) {
        self.on_added_to_stack(ctx, paused);
        self.on_activated(ctx, paused);
    }

    /// `Pop` was delivered: the state left the stack, uncovering `next`.
    fn on_popped(&mut self, ctx: &StateContext, next: Option<StateId>) {
        self.on_deactivated(ctx, next);
        self.on_removed_from_stack(ctx, next);
    }

    /// `Resume` was delivered: `popped` left the stack and this state is
    /// ticking again.
    fn on_resumed(&mut self, ctx: &StateContext, popped: Option<StateId>) {
        self.on_activated(ctx, popped);
    }

    /// `Pause` was delivered: `pushed` was placed above this state.
    fn on_paused(&mut self, ctx: &StateContext, pushed: Option<StateId>) {
        self.on_deactivated(ctx, pushed);
    }
}

/// Marker for states usable as a machine's global supervisory state.
///
/// A global state is active for the machine's entire lifetime and never
/// participates in the stack: it receives `Begin` when active states begin
/// and `End` at teardown, and the orchestrator rejects any goto or push
/// targeting it. Delivering Push/Pop/Pause/Resume to a global state is a
/// defect in the orchestrator, not a runtime condition.
pub trait GlobalState: MachineState {}
