//! The orchestrator: machine, transition operations, pending-push queue and
//! configuration.

mod builder;
mod error;
pub(crate) mod machine;
pub(crate) mod queue;

pub use builder::FsmBuilder;
pub use error::{BuildError, TransitionError};
pub use machine::{FiniteStateMachine, DEFAULT_SWEEP_INTERVAL};
pub use queue::{PushRequestHandle, PushResult, RequestWait};
