//! The per-state side of the framework.
//!
//! A machine state is a user type implementing [`MachineState`]; the
//! orchestrator owns one boxed instance per registered type. Beside the
//! behavior trait this module holds the label runtime ([`LabelRegistry`]
//! and the internal per-state bookkeeping) and [`StateContext`], the weak
//! handle hooks and label bodies use to talk back to the owning machine.

pub(crate) mod context;
pub(crate) mod labels;
mod state;

pub use context::StateContext;
pub use labels::LabelRegistry;
pub use state::{GlobalState, MachineState};
