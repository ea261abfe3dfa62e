//! Per-state label runtime: the registered routine table and the running
//! label / latent-execution bookkeeping.

use std::cell::Cell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tracing::warn;

use crate::core::{Label, StateId};
use crate::machine::StateContext;

/// A running label body, boxed and pinned for the tick-driven poll loop.
pub(crate) type LabelFuture = Pin<Box<dyn Future<Output = ()>>>;

type LabelFactory = Box<dyn Fn(StateContext) -> LabelFuture>;

/// The label routines one state registers, keyed by tag.
///
/// Passed to [`MachineState::register_labels`](crate::MachineState::register_labels)
/// at registration time; immutable afterwards. Each entry is a factory: the
/// machine instantiates a fresh routine whenever the label activates.
///
/// Malformed tags and duplicate registrations are refused with a warning
/// rather than an error; the label simply stays unregistered, and a later
/// `goto_label` to it fails.
pub struct LabelRegistry {
    state: StateId,
    factories: HashMap<Label, LabelFactory>,
}

impl LabelRegistry {
    pub(crate) fn new(state: StateId) -> Self {
        LabelRegistry {
            state,
            factories: HashMap::new(),
        }
    }

    /// Registers a routine factory for `label`.
    ///
    /// The factory receives a [`StateContext`] and returns the label body,
    /// typically an `async move` block capturing it.
    pub fn add<F, Fut>(&mut self, label: Label, factory: F) -> &mut Self
    where
        F: Fn(StateContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        if !label.is_valid_tag() {
            warn!(state = %self.state, label = %label, "refusing label with a malformed tag");
            return self;
        }
        if self.factories.contains_key(&label) {
            warn!(state = %self.state, label = %label, "refusing duplicate label registration");
            return self;
        }
        self.factories
            .insert(label, Box::new(move |ctx| Box::pin(factory(ctx))));
        self
    }

    /// True if a routine is registered for `label`.
    pub fn contains(&self, label: &Label) -> bool {
        self.factories.contains_key(label)
    }

    /// The registered label tags, in no particular order.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.factories.keys()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds a fresh routine for `label`, if one is registered.
    pub(crate) fn instantiate(&self, label: &Label, ctx: StateContext) -> Option<LabelFuture> {
        self.factories.get(label).map(|factory| factory(ctx))
    }
}

/// Cancel trigger shared between a latent execution and its owning state.
///
/// Firing it is cooperative: the latent wrapper observes the flag at its
/// next poll and unwinds. `resolved` marks the handle as finished so the
/// periodic sweep can drop it.
pub(crate) struct LatentCanceller {
    canceled: Cell<bool>,
    resolved: Cell<bool>,
}

impl LatentCanceller {
    fn new() -> Self {
        LatentCanceller {
            canceled: Cell::new(false),
            resolved: Cell::new(false),
        }
    }

    /// Signals cancellation. Returns true if this call canceled a still
    /// pending execution.
    pub(crate) fn fire(&self) -> bool {
        if self.resolved.get() || self.canceled.get() {
            return false;
        }
        self.canceled.set(true);
        true
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.get()
    }

    pub(crate) fn mark_resolved(&self) {
        self.resolved.set(true);
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.get()
    }
}

pub(crate) struct LatentHandle {
    pub(crate) tag: String,
    pub(crate) canceller: Rc<LatentCanceller>,
}

pub(crate) struct RunningLabel {
    pub(crate) id: u64,
    pub(crate) started_tick: u64,
    /// Taken out while being polled so cleanup triggered from inside the
    /// body never aliases.
    pub(crate) future: Option<LabelFuture>,
}

/// The mutable label bookkeeping of one state.
pub(crate) struct LabelUnit {
    pub(crate) active_label: Label,
    /// Whether the active label's routine has been instantiated since it
    /// became active.
    pub(crate) activated: bool,
    running: Vec<RunningLabel>,
    latents: Vec<LatentHandle>,
    next_task: u64,
}

impl LabelUnit {
    pub(crate) fn new() -> Self {
        LabelUnit {
            active_label: Label::DEFAULT,
            activated: false,
            running: Vec::new(),
            latents: Vec::new(),
            next_task: 0,
        }
    }

    /// Drops every running label body. The active label restarts fresh on
    /// the next activation.
    pub(crate) fn stop_running_labels(&mut self) -> usize {
        let stopped = self.running.len();
        self.running.clear();
        self.activated = false;
        stopped
    }

    /// Fires every pending cancel trigger; returns the count canceled.
    pub(crate) fn stop_latent_executions(&mut self) -> usize {
        self.latents
            .iter()
            .filter(|handle| handle.canceller.fire())
            .count()
    }

    /// Removal cleanup: stop labels and latents, return to the default
    /// label.
    pub(crate) fn reset(&mut self) {
        self.stop_running_labels();
        self.stop_latent_executions();
        self.active_label = Label::DEFAULT;
    }

    pub(crate) fn register_latent(&mut self, tag: String) -> Rc<LatentCanceller> {
        let canceller = Rc::new(LatentCanceller::new());
        self.latents.push(LatentHandle {
            tag,
            canceller: Rc::clone(&canceller),
        });
        canceller
    }

    pub(crate) fn insert_running(&mut self, started_tick: u64, future: LabelFuture) -> u64 {
        let id = self.next_task;
        self.next_task += 1;
        self.running.push(RunningLabel {
            id,
            started_tick,
            future: Some(future),
        });
        id
    }

    /// Ids of running labels started before `tick`, in start order.
    pub(crate) fn pollable_ids(&self, tick: u64) -> Vec<u64> {
        self.running
            .iter()
            .filter(|entry| entry.started_tick < tick && entry.future.is_some())
            .map(|entry| entry.id)
            .collect()
    }

    pub(crate) fn take_future(&mut self, id: u64) -> Option<LabelFuture> {
        self.running
            .iter_mut()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.future.take())
    }

    /// Puts a polled future back. Returns false if the entry was removed
    /// meanwhile (the future is then dropped by the caller).
    pub(crate) fn restore_future(&mut self, id: u64, future: LabelFuture) -> bool {
        match self.running.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.future = Some(future);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_running(&mut self, id: u64) {
        self.running.retain(|entry| entry.id != id);
    }

    pub(crate) fn running_count(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn latent_count(&self) -> usize {
        self.latents.len()
    }

    /// Drops handles of already-resolved latent executions. Returns the
    /// count swept.
    pub(crate) fn sweep_cancellers(&mut self) -> usize {
        let before = self.latents.len();
        self.latents.retain(|handle| !handle.canceller.is_resolved());
        before - self.latents.len()
    }

    pub(crate) fn latent_tags(&self) -> impl Iterator<Item = &str> {
        self.latents.iter().map(|handle| handle.tag.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Weak;

    use crate::machine::MachineState;

    struct Host;
    impl MachineState for Host {}

    fn registry() -> LabelRegistry {
        LabelRegistry::new(StateId::of::<Host>())
    }

    fn ctx() -> StateContext {
        StateContext::new(Weak::new(), StateId::of::<Host>())
    }

    #[test]
    fn malformed_and_duplicate_tags_are_refused() {
        let mut registry = registry();
        registry
            .add(Label::from_static("NoNamespace"), |_ctx| async {})
            .add(Label::from_static("Label.Work"), |_ctx| async {})
            .add(Label::from_static("Label.Work"), |_ctx| async {});

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&Label::from_static("Label.Work")));
        assert!(!registry.contains(&Label::from_static("NoNamespace")));
    }

    #[test]
    fn instantiate_builds_a_fresh_routine_each_time() {
        let mut registry = registry();
        registry.add(Label::from_static("Label.Work"), |_ctx| async {});

        let label = Label::from_static("Label.Work");
        assert!(registry.instantiate(&label, ctx()).is_some());
        assert!(registry.instantiate(&label, ctx()).is_some());
        assert!(registry.instantiate(&Label::DEFAULT, ctx()).is_none());
    }

    #[test]
    fn reset_clears_labels_and_returns_to_default() {
        let mut unit = LabelUnit::new();
        unit.active_label = Label::from_static("Label.Work");
        unit.activated = true;
        unit.insert_running(0, Box::pin(async {}));
        let canceller = unit.register_latent("wait".into());

        unit.reset();

        assert_eq!(unit.active_label, Label::DEFAULT);
        assert!(!unit.activated);
        assert_eq!(unit.running_count(), 0);
        assert!(canceller.is_canceled());
    }

    #[test]
    fn stop_latent_executions_counts_newly_canceled_only() {
        let mut unit = LabelUnit::new();
        let first = unit.register_latent("a".into());
        let second = unit.register_latent("b".into());
        second.mark_resolved();

        assert_eq!(unit.stop_latent_executions(), 1);
        assert!(first.is_canceled());
        assert!(!second.is_canceled());
        // Firing again cancels nothing new.
        assert_eq!(unit.stop_latent_executions(), 0);
    }

    #[test]
    fn sweep_drops_resolved_handles() {
        let mut unit = LabelUnit::new();
        let keep = unit.register_latent("keep".into());
        let done = unit.register_latent("done".into());
        done.mark_resolved();

        assert_eq!(unit.sweep_cancellers(), 1);
        assert_eq!(unit.latent_count(), 1);
        assert!(!keep.is_resolved());
    }

    #[test]
    fn taken_futures_are_dropped_when_the_entry_vanishes() {
        let mut unit = LabelUnit::new();
        let id = unit.insert_running(0, Box::pin(async {}));
        let future = unit.take_future(id).unwrap();

        unit.stop_running_labels();
        assert!(!unit.restore_future(id, future));
        assert_eq!(unit.running_count(), 0);
    }

    #[test]
    fn pollable_ids_skip_labels_started_this_tick() {
        let mut unit = LabelUnit::new();
        let old = unit.insert_running(3, Box::pin(async {}));
        unit.insert_running(5, Box::pin(async {}));

        assert_eq!(unit.pollable_ids(5), vec![old]);
        assert_eq!(unit.pollable_ids(6).len(), 2);
    }
}
