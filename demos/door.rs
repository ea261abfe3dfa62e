//! Automatic Door State Machine
//!
//! This example demonstrates the pending-push queue and transition
//! block-lists on a small automatic door.
//!
//! Key concepts:
//! - Queued pushes that wait until they can apply
//! - Block-lists deferring pushes instead of failing them
//! - Request handles: listeners, pending checks and cancellation
//! - A state that removes itself from the stack
//!
//! Run with: cargo run --example door

use stackfsm::{
    FiniteStateMachine, Label, LabelRegistry, MachineState, StateContext, StateId,
};

struct Closed;

impl MachineState for Closed {
    fn on_began(&mut self, _ctx: &StateContext, _previous: Option<StateId>) {
        println!("[door] closed");
    }
    fn on_resumed(&mut self, _ctx: &StateContext, _popped: Option<StateId>) {
        println!("[door] closed again");
    }
}

struct Open;

impl MachineState for Open {
    fn on_pushed(&mut self, _ctx: &StateContext, _previous: Option<StateId>) {
        println!("[door] opening");
    }

    fn register_labels(&self, registry: &mut LabelRegistry) {
        registry.add(Label::DEFAULT, |ctx: StateContext| async move {
            // Hold the door, then close it on our own.
            ctx.run_latent_named("hold open", ctx.sleep(2.0)).await;
            println!("[door] closing automatically at t={:.1}", ctx.time());
            ctx.pop_state().ok();
        });
    }
}

struct Locked;

impl MachineState for Locked {
    fn blocked_transitions(&self) -> Vec<StateId> {
        vec![StateId::of::<Open>()]
    }
    fn on_pushed(&mut self, _ctx: &StateContext, _previous: Option<StateId>) {
        println!("[door] locked for maintenance");
    }
    fn on_popped(&mut self, _ctx: &StateContext, _next: Option<StateId>) {
        println!("[door] unlocked");
    }
}

fn main() {
    println!("=== Automatic Door State Machine ===\n");

    let mut fsm = FiniteStateMachine::builder()
        .state(Closed)
        .state(Open)
        .state(Locked)
        .initial_state::<Closed>(Label::DEFAULT)
        .build()
        .unwrap();
    fsm.set_active(true);

    fsm.push_state::<Locked>(Label::DEFAULT).unwrap();

    // Locked blocks Open, so the request queues instead of failing.
    let request = fsm.push_state_queued::<Open>(Label::DEFAULT).unwrap();
    request.on_result(|result| println!("[request] open request resolved: {result:?}"));
    println!(
        "[request] open requested while locked, pending: {}",
        request.is_pending()
    );

    // Unlocking changes the stack; the queued request applies immediately.
    fsm.pop_state().unwrap();

    // A second request while the door is already open queues, then gets
    // canceled.
    let second = fsm.push_state_queued::<Open>(Label::DEFAULT).unwrap();
    println!(
        "[request] second open request queued: {}",
        second.is_pending()
    );
    second.cancel();

    // Let the door hold open and close itself.
    for _ in 0..6 {
        fsm.tick(0.5);
    }

    println!("\nFinal stack (bottom to top):");
    for state in fsm.stack() {
        println!("  {state}");
    }

    fsm.shutdown();
    println!("\n=== Example Complete ===");
}
