//! Cooperative futures driven by the machine's tick.
//!
//! There is no async runtime here: label bodies and the futures they await
//! are polled once per [`tick`](crate::FiniteStateMachine::tick) with a
//! no-op waker. The tick is the scheduler, so an `.await` point resumes at
//! most once per tick.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::core::StateId;
use crate::fsm::machine::FsmCore;
use crate::machine::labels::{LabelFuture, LatentCanceller};

/// Polls a stored label future once with a no-op waker.
pub(crate) fn poll_unit(future: &mut LabelFuture) -> Poll<()> {
    let mut cx = Context::from_waker(Waker::noop());
    future.as_mut().poll(&mut cx)
}

/// How a latent execution finished.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LatentOutcome {
    /// The wrapped operation ran to completion.
    Completed,
    /// A cancel trigger fired before the result could be delivered.
    Canceled,
}

impl LatentOutcome {
    pub fn is_completed(self) -> bool {
        matches!(self, LatentOutcome::Completed)
    }

    pub fn is_canceled(self) -> bool {
        matches!(self, LatentOutcome::Canceled)
    }
}

/// Suspends until the given number of game-time seconds has elapsed.
///
/// Created by [`StateContext::sleep`](crate::StateContext::sleep). Game time
/// is the accumulated sum of tick deltas; the deadline is captured at the
/// first poll. Resolves immediately if the machine is gone.
pub struct Sleep {
    core: Weak<FsmCore>,
    seconds: f64,
    deadline: Option<f64>,
}

impl Sleep {
    pub(crate) fn new(core: Weak<FsmCore>, seconds: f64) -> Self {
        Sleep {
            core,
            seconds,
            deadline: None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let Some(core) = self.core.upgrade() else {
            return Poll::Ready(());
        };
        let now = core.game_time();
        let target = now + self.seconds;
        let deadline = *self.deadline.get_or_insert(target);
        if now >= deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Suspends until the next machine tick.
///
/// Created by [`StateContext::next_tick`](crate::StateContext::next_tick).
pub struct NextTick {
    core: Weak<FsmCore>,
    seen: Option<u64>,
}

impl NextTick {
    pub(crate) fn new(core: Weak<FsmCore>) -> Self {
        NextTick { core, seen: None }
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let Some(core) = self.core.upgrade() else {
            return Poll::Ready(());
        };
        let now = core.tick_count();
        let seen = *self.seen.get_or_insert(now);
        if now > seen {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// A cancellable asynchronous operation tied to its owning state.
///
/// Created by [`StateContext::run_latent`](crate::StateContext::run_latent).
/// The wrapper registers a cancel trigger with the owning state, races the
/// wrapped operation against it, and then holds the result until the owning
/// state is either destroyed or active (ticking) again. Latent code
/// therefore never runs ahead while its state is paused: the continuation
/// after `.await` resumes only once the state itself resumes.
///
/// Resolves [`LatentOutcome::Canceled`] if a cancellation was requested at
/// any point before delivery, [`LatentOutcome::Completed`] otherwise.
pub struct LatentExecution {
    core: Weak<FsmCore>,
    state: StateId,
    tag: String,
    inner: Option<LabelFuture>,
    canceller: Option<Rc<LatentCanceller>>,
    gated: bool,
}

impl LatentExecution {
    pub(crate) fn new<F>(core: Weak<FsmCore>, state: StateId, tag: String, operation: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        LatentExecution {
            core,
            state,
            tag,
            inner: Some(Box::pin(operation)),
            canceller: None,
            gated: false,
        }
    }

    /// The debug tag this execution was registered under.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Future for LatentExecution {
    type Output = LatentOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<LatentOutcome> {
        let this = &mut *self;
        let Some(core) = this.core.upgrade() else {
            return Poll::Ready(LatentOutcome::Canceled);
        };
        let Some(slot) = core.find_slot(this.state) else {
            return Poll::Ready(LatentOutcome::Canceled);
        };

        let canceller = this
            .canceller
            .get_or_insert_with(|| slot.unit.borrow_mut().register_latent(this.tag.clone()))
            .clone();

        if !this.gated {
            if canceller.is_canceled() {
                this.inner = None;
                this.gated = true;
            } else if let Some(inner) = this.inner.as_mut() {
                if inner.as_mut().poll(cx).is_ready() {
                    this.inner = None;
                    this.gated = true;
                }
            } else {
                this.gated = true;
            }
        }

        if this.gated && (slot.destroyed.get() || slot.is_active.get()) {
            canceller.mark_resolved();
            let outcome = if canceller.is_canceled() {
                LatentOutcome::Canceled
            } else {
                LatentOutcome::Completed
            };
            return Poll::Ready(outcome);
        }
        Poll::Pending
    }
}

impl Drop for LatentExecution {
    fn drop(&mut self) {
        if let Some(canceller) = &self.canceller {
            canceller.mark_resolved();
        }
    }
}

/// Resolves once a pushed state has left the stack again.
///
/// Returned by [`push_state`](crate::FiniteStateMachine::push_state). The
/// routine that awaits it (typically a label of the state that was paused by
/// the push) logically suspends until the pushed state, and everything
/// pushed after it, has been popped back down. Awaiting is optional;
/// dropping the future makes the push fire-and-forget.
pub struct PushWait {
    core: Weak<FsmCore>,
    done: Rc<Cell<bool>>,
}

impl PushWait {
    pub(crate) fn new(core: Weak<FsmCore>, done: Rc<Cell<bool>>) -> Self {
        PushWait { core, done }
    }
}

impl Future for PushWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.done.get() || self.core.upgrade().is_none() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_outcome(future: &mut LatentExecution) -> Poll<LatentOutcome> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn sleep_resolves_without_a_machine() {
        let mut sleep: LabelFuture = Box::pin(Sleep::new(Weak::new(), 5.0));
        assert!(poll_unit(&mut sleep).is_ready());
    }

    #[test]
    fn next_tick_resolves_without_a_machine() {
        let mut next: LabelFuture = Box::pin(NextTick::new(Weak::new()));
        assert!(poll_unit(&mut next).is_ready());
    }

    #[test]
    fn detached_latent_execution_cancels() {
        struct Detached;
        impl crate::machine::MachineState for Detached {}

        let mut latent =
            LatentExecution::new(Weak::new(), StateId::of::<Detached>(), "test".into(), async {});
        assert_eq!(poll_outcome(&mut latent), Poll::Ready(LatentOutcome::Canceled));
    }

    #[test]
    fn push_wait_resolves_when_flagged() {
        let done = Rc::new(Cell::new(false));
        // A dead weak machine reference resolves immediately.
        let mut wait: LabelFuture = Box::pin(PushWait::new(Weak::new(), Rc::clone(&done)));
        assert!(poll_unit(&mut wait).is_ready());
    }
}
