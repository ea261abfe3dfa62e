//! Fluent pre-activation configuration of a machine.

use crate::core::Label;
use crate::fsm::{BuildError, FiniteStateMachine};
use crate::machine::{GlobalState, MachineState};

/// Builds a configured, initialized [`FiniteStateMachine`].
///
/// The first configuration error is remembered and reported by
/// [`build`](Self::build); later calls on a failed builder are no-ops. The
/// built machine is initialized but not active; the host enables it with
/// [`set_active(true)`](FiniteStateMachine::set_active).
///
/// # Example
///
/// ```
/// use stackfsm::{FiniteStateMachine, GlobalState, Label, MachineState};
///
/// struct Supervisor;
/// impl MachineState for Supervisor {}
/// impl GlobalState for Supervisor {}
///
/// struct Idle;
/// impl MachineState for Idle {}
///
/// let mut fsm = FiniteStateMachine::builder()
///     .global_state(Supervisor)
///     .state(Idle)
///     .initial_state::<Idle>(Label::DEFAULT)
///     .build()
///     .unwrap();
/// fsm.set_active(true);
/// assert!(fsm.is_in_state::<Idle>());
/// ```
pub struct FsmBuilder {
    machine: FiniteStateMachine,
    error: Option<BuildError>,
}

impl FsmBuilder {
    pub(crate) fn new() -> Self {
        FsmBuilder {
            machine: FiniteStateMachine::new(),
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), BuildError>) {
        if self.error.is_none() {
            self.error = result.err();
        }
    }

    /// Registers a normal (stack-participating) state.
    pub fn state<S: MachineState>(mut self, state: S) -> Self {
        let result = self.machine.register_state(state);
        self.record(result);
        self
    }

    /// Registers the machine's global supervisory state.
    pub fn global_state<S: GlobalState>(mut self, state: S) -> Self {
        let result = self.machine.set_global_state(state);
        self.record(result);
        self
    }

    /// Configures the state pushed when active states begin, starting at
    /// `label`.
    pub fn initial_state<S: MachineState>(mut self, label: Label) -> Self {
        let result = self.machine.set_initial_state::<S>(label);
        self.record(result);
        self
    }

    /// Overrides the game-time interval between sweeps of resolved
    /// latent-execution cancellers (default 60 seconds).
    pub fn canceller_sweep_interval(mut self, seconds: f64) -> Self {
        let result = self.machine.set_canceller_sweep_interval(seconds);
        self.record(result);
        self
    }

    /// Validates the configuration and returns the initialized machine.
    pub fn build(mut self) -> Result<FiniteStateMachine, BuildError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.machine.initialize()?;
        Ok(self.machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateContext;

    struct Watcher;
    impl MachineState for Watcher {}
    impl GlobalState for Watcher {}

    struct Idle;
    impl MachineState for Idle {}

    struct Busy;
    impl MachineState for Busy {}

    #[test]
    fn builds_an_initialized_inactive_machine() {
        let fsm = FiniteStateMachine::builder()
            .global_state(Watcher)
            .state(Idle)
            .state(Busy)
            .initial_state::<Idle>(Label::DEFAULT)
            .canceller_sweep_interval(10.0)
            .build()
            .unwrap();

        assert!(fsm.is_initialized());
        assert!(!fsm.is_active());
        assert!(fsm.active_state().is_none());
        assert_eq!(fsm.registered_states().len(), 3);
    }

    #[test]
    fn duplicate_registration_fails_the_build() {
        let result = FiniteStateMachine::builder()
            .state(Idle)
            .state(Idle)
            .build();
        assert!(matches!(result, Err(BuildError::DuplicateState(_))));
    }

    #[test]
    fn unregistered_initial_state_fails_the_build() {
        let result = FiniteStateMachine::builder()
            .state(Idle)
            .initial_state::<Busy>(Label::DEFAULT)
            .build();
        assert!(matches!(result, Err(BuildError::UnknownState(_))));
    }

    #[test]
    fn global_state_cannot_be_the_initial_state() {
        let result = FiniteStateMachine::builder()
            .global_state(Watcher)
            .initial_state::<Watcher>(Label::DEFAULT)
            .build();
        assert!(matches!(result, Err(BuildError::GlobalStateInStack(_))));
    }

    #[test]
    fn malformed_initial_label_fails_the_build() {
        let result = FiniteStateMachine::builder()
            .state(Idle)
            .initial_state::<Idle>(Label::from_static("Idle"))
            .build();
        assert!(matches!(result, Err(BuildError::InvalidLabel(_))));
    }

    #[test]
    fn first_error_wins() {
        struct Loud;
        impl MachineState for Loud {
            fn register_labels(&self, registry: &mut crate::machine::LabelRegistry) {
                registry.add(Label::from_static("Label.Shout"), |_ctx: StateContext| async {});
            }
        }

        let result = FiniteStateMachine::builder()
            .state(Idle)
            .state(Idle)
            .initial_state::<Loud>(Label::DEFAULT)
            .build();
        assert!(matches!(result, Err(BuildError::DuplicateState(_))));
    }

    #[test]
    fn post_build_configuration_is_rejected() {
        let mut fsm = FiniteStateMachine::builder()
            .state(Idle)
            .initial_state::<Idle>(Label::DEFAULT)
            .build()
            .unwrap();

        assert_eq!(
            fsm.set_initial_state::<Idle>(Label::DEFAULT),
            Err(BuildError::AlreadyInitialized)
        );
        assert_eq!(
            fsm.set_canceller_sweep_interval(5.0),
            Err(BuildError::AlreadyInitialized)
        );
        assert_eq!(fsm.initialize(), Err(BuildError::AlreadyInitialized));
        // Registration of further states stays allowed.
        assert!(fsm.register_state(Busy).is_ok());
    }
}
