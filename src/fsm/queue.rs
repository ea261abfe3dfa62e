//! Pending push requests and the handles callers keep for them.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::core::{Label, StateId};
use crate::fsm::machine::FsmCore;

/// How a queued push request resolved.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PushResult {
    /// The push was applied. Broadcast immediately before the `Push` event
    /// fires.
    Success,
    /// The request was canceled (explicitly or by machine teardown) before
    /// it could apply.
    Canceled,
}

/// Shared between a queued request and every handle/listener bound to it.
pub(crate) struct RequestShared {
    result: Cell<Option<PushResult>>,
    listeners: RefCell<Vec<Box<dyn FnOnce(PushResult)>>>,
}

impl RequestShared {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(RequestShared {
            result: Cell::new(None),
            listeners: RefCell::new(Vec::new()),
        })
    }

    /// Resolves the request and broadcasts to every bound listener. A second
    /// resolution is ignored.
    pub(crate) fn resolve(&self, result: PushResult) {
        if self.result.get().is_some() {
            return;
        }
        self.result.set(Some(result));
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners {
            listener(result);
        }
    }

    pub(crate) fn result(&self) -> Option<PushResult> {
        self.result.get()
    }

    fn add_listener(&self, listener: Box<dyn FnOnce(PushResult)>) {
        match self.result.get() {
            Some(result) => listener(result),
            None => self.listeners.borrow_mut().push(listener),
        }
    }
}

/// One entry of the machine's FIFO pending-push queue.
pub(crate) struct PendingPushRequest {
    pub(crate) id: u64,
    pub(crate) target: StateId,
    pub(crate) label: Label,
    pub(crate) shared: Rc<RequestShared>,
}

/// The caller's handle to a [`push_state_queued`](crate::FiniteStateMachine::push_state_queued)
/// request.
///
/// The handle observes and controls the request; dropping it neither cancels
/// nor resolves anything. Request ids are unique and monotonically
/// increasing per machine.
pub struct PushRequestHandle {
    id: u64,
    target: StateId,
    shared: Rc<RequestShared>,
    core: Weak<FsmCore>,
}

impl PushRequestHandle {
    pub(crate) fn new(id: u64, target: StateId, shared: Rc<RequestShared>, core: Weak<FsmCore>) -> Self {
        PushRequestHandle {
            id,
            target,
            shared,
            core,
        }
    }

    /// The unique id of this request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The state this request wants pushed.
    pub fn target(&self) -> StateId {
        self.target
    }

    /// True while the request sits in the queue unresolved.
    pub fn is_pending(&self) -> bool {
        self.shared.result().is_none()
    }

    /// The broadcast result, once there is one.
    pub fn result(&self) -> Option<PushResult> {
        self.shared.result()
    }

    /// Removes the request from the queue and broadcasts
    /// [`PushResult::Canceled`]. Returns false if the request had already
    /// resolved.
    pub fn cancel(&self) -> bool {
        if self.shared.result().is_some() {
            return false;
        }
        if let Some(core) = self.core.upgrade() {
            core.cancel_push_request(self.id);
        }
        // The machine may already be gone; resolve directly in that case.
        self.shared.resolve(PushResult::Canceled);
        true
    }

    /// Binds a completion listener. Called immediately if the request has
    /// already resolved.
    pub fn on_result(&self, listener: impl FnOnce(PushResult) + 'static) {
        self.shared.add_listener(Box::new(listener));
    }

    /// A future resolving to the broadcast result. Suitable for awaiting
    /// from a label body.
    pub fn wait(&self) -> RequestWait {
        RequestWait {
            shared: Rc::clone(&self.shared),
        }
    }
}

/// Future returned by [`PushRequestHandle::wait`].
pub struct RequestWait {
    shared: Rc<RequestShared>,
}

impl Future for RequestWait {
    type Output = PushResult;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<PushResult> {
        match self.shared.result() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineState;

    struct Target;
    impl MachineState for Target {}

    fn handle(shared: &Rc<RequestShared>) -> PushRequestHandle {
        PushRequestHandle::new(7, StateId::of::<Target>(), Rc::clone(shared), Weak::new())
    }

    #[test]
    fn listeners_fire_once_on_resolution() {
        let shared = RequestShared::new();
        let handle = handle(&shared);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        handle.on_result(move |result| sink.borrow_mut().push(result));
        assert!(handle.is_pending());

        shared.resolve(PushResult::Success);
        shared.resolve(PushResult::Canceled); // ignored

        assert_eq!(*seen.borrow(), vec![PushResult::Success]);
        assert_eq!(handle.result(), Some(PushResult::Success));
        assert!(!handle.is_pending());
    }

    #[test]
    fn late_listeners_fire_immediately() {
        let shared = RequestShared::new();
        shared.resolve(PushResult::Canceled);

        let handle = handle(&shared);
        let seen = Rc::new(Cell::new(None));
        let sink = Rc::clone(&seen);
        handle.on_result(move |result| sink.set(Some(result)));

        assert_eq!(seen.get(), Some(PushResult::Canceled));
    }

    #[test]
    fn cancel_without_a_machine_still_broadcasts() {
        let shared = RequestShared::new();
        let handle = handle(&shared);

        assert!(handle.cancel());
        assert_eq!(handle.result(), Some(PushResult::Canceled));
        // Already resolved; a second cancel reports failure.
        assert!(!handle.cancel());
    }

    #[test]
    fn wait_future_tracks_resolution() {
        use crate::machine::labels::LabelFuture;

        let shared = RequestShared::new();
        let handle = handle(&shared);
        let outcome = Rc::new(Cell::new(None));

        let sink = Rc::clone(&outcome);
        let wait = handle.wait();
        let mut future: LabelFuture = Box::pin(async move {
            sink.set(Some(wait.await));
        });

        assert!(crate::latent::poll_unit(&mut future).is_pending());
        shared.resolve(PushResult::Success);
        assert!(crate::latent::poll_unit(&mut future).is_ready());
        assert_eq!(outcome.get(), Some(PushResult::Success));
    }
}
