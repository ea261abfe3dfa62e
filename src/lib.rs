//! Stackfsm: a hierarchical, stack-based finite state machine for game
//! actors.
//!
//! A machine owns an optional global supervisory state plus a LIFO stack of
//! normal states; only the stack top actively executes. States receive six
//! lifecycle actions (`Begin`, `End`, `Push`, `Pop`, `Resume`, `Pause`) and
//! drive behavior through cooperative labels: named async routines polled
//! once per tick, with no async runtime behind them.
//!
//! # Core Concepts
//!
//! - **States**: plain types implementing [`MachineState`], identified by
//!   their concrete type
//! - **The stack**: `goto` replaces the top, `push`/`pop` layer interrupting
//!   behavior on top of paused behavior
//! - **Labels**: per-state async routines, switched with
//!   [`StateContext::goto_label`]
//! - **Latent executions**: cancellable operations whose continuations never
//!   run while their state is paused
//!
//! # Example
//!
//! ```rust
//! use stackfsm::{FiniteStateMachine, Label, LabelRegistry, MachineState, StateContext};
//!
//! struct Patrol;
//!
//! impl MachineState for Patrol {
//!     fn register_labels(&self, registry: &mut LabelRegistry) {
//!         registry.add(Label::DEFAULT, |ctx: StateContext| async move {
//!             ctx.run_latent(ctx.sleep(2.0)).await;
//!             ctx.goto_state::<Chase>(Label::DEFAULT, false).ok();
//!         });
//!     }
//! }
//!
//! struct Chase;
//! impl MachineState for Chase {}
//!
//! let mut fsm = FiniteStateMachine::builder()
//!     .state(Patrol)
//!     .state(Chase)
//!     .initial_state::<Patrol>(Label::DEFAULT)
//!     .build()
//!     .unwrap();
//! fsm.set_active(true);
//! assert!(fsm.is_in_state::<Patrol>());
//!
//! for _ in 0..3 {
//!     fsm.tick(1.0);
//! }
//! assert!(fsm.is_in_state::<Chase>());
//! ```

pub mod core;
pub mod debug;
mod fsm;
mod latent;
mod machine;

// Re-export commonly used types
pub use core::{ActionHistory, ActionRecord, Label, StateAction, StateId, LABEL_NAMESPACE, MAX_ACTION_HISTORY};
pub use debug::{FsmSnapshot, StateSnapshot};
pub use fsm::{
    BuildError, FiniteStateMachine, FsmBuilder, PushRequestHandle, PushResult, RequestWait,
    TransitionError, DEFAULT_SWEEP_INTERVAL,
};
pub use latent::{LatentExecution, LatentOutcome, NextTick, PushWait, Sleep};
pub use machine::{GlobalState, LabelRegistry, MachineState, StateContext};
