//! Guard Patrol State Machine
//!
//! This example demonstrates a patrolling guard whose routine is
//! interrupted by combat and resumed afterwards.
//!
//! Key concepts:
//! - A global supervisory state alongside the stack
//! - Cooperative labels driven by the tick
//! - Latent executions (game-time sleeps) owned by their state
//! - Push/pop layering with automatic resume
//!
//! Run with: cargo run --example patrol

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use stackfsm::{
    FiniteStateMachine, GlobalState, Label, LabelRegistry, MachineState, StateContext, StateId,
};

/// Shared counters living on the patrol state.
struct Blackboard {
    waypoints_visited: Cell<u32>,
    threats_handled: Cell<u32>,
}

struct Sentinel;

impl MachineState for Sentinel {
    fn on_began(&mut self, _ctx: &StateContext, _previous: Option<StateId>) {
        println!("[sentinel] supervision online");
    }
    fn on_ended(&mut self, _ctx: &StateContext, _next: Option<StateId>) {
        println!("[sentinel] supervision offline");
    }
}
impl GlobalState for Sentinel {}

struct Patrol;

impl MachineState for Patrol {
    fn create_data(&self) -> Option<Rc<dyn Any>> {
        Some(Rc::new(Blackboard {
            waypoints_visited: Cell::new(0),
            threats_handled: Cell::new(0),
        }))
    }

    fn register_labels(&self, registry: &mut LabelRegistry) {
        registry.add(Label::DEFAULT, |ctx: StateContext| async move {
            loop {
                if ctx.run_latent_named("walk", ctx.sleep(1.0)).await.is_canceled() {
                    return;
                }
                let board = ctx.data::<Blackboard>().unwrap();
                let visited = board.waypoints_visited.get() + 1;
                board.waypoints_visited.set(visited);
                println!("[patrol] reached waypoint {visited} at t={:.1}", ctx.time());

                if visited % 3 == 0 {
                    println!("[patrol] spotted an intruder, engaging");
                    if let Ok(wait) = ctx.push_state::<Combat>(Label::DEFAULT) {
                        wait.await;
                        println!("[patrol] area clear, resuming the route");
                    }
                }
            }
        });
    }
}

struct Combat;

impl MachineState for Combat {
    fn register_labels(&self, registry: &mut LabelRegistry) {
        registry.add(Label::DEFAULT, |ctx: StateContext| async move {
            println!("  [combat] weapons drawn at t={:.1}", ctx.time());
            if ctx.run_latent_named("fight", ctx.sleep(2.0)).await.is_completed() {
                if let Some(board) = ctx.state_data::<Patrol, Blackboard>() {
                    board.threats_handled.set(board.threats_handled.get() + 1);
                }
                println!("  [combat] threat neutralized at t={:.1}", ctx.time());
            }
            ctx.pop_state().ok();
        });
    }

    fn debug_data(&self) -> String {
        "stance=aggressive".into()
    }
}

fn main() {
    println!("=== Guard Patrol State Machine ===\n");

    let mut fsm = FiniteStateMachine::builder()
        .global_state(Sentinel)
        .state(Patrol)
        .state(Combat)
        .initial_state::<Patrol>(Label::DEFAULT)
        .build()
        .unwrap();
    fsm.set_active(true);

    // Drive the machine the way a game loop would.
    for _ in 0..24 {
        fsm.tick(0.5);
    }

    let board = fsm.state_data::<Patrol, Blackboard>().unwrap();
    println!("\nAfter {:.1}s of game time:", fsm.time());
    println!("  waypoints visited: {}", board.waypoints_visited.get());
    println!("  threats handled:   {}", board.threats_handled.get());

    println!("\nLifecycle history:");
    for record in fsm.history().records() {
        println!("  t={:5.1}  {} -> {}", record.at, record.state, record.action);
    }

    fsm.shutdown();
    println!("\n=== Example Complete ===");
}
