//! Bounded history of delivered lifecycle actions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{StateAction, StateId};

/// How many records [`ActionHistory`] keeps by default.
pub const MAX_ACTION_HISTORY: usize = 100;

/// A single delivered lifecycle action.
///
/// `at` is the machine's accumulated game time in seconds at delivery;
/// `timestamp` is the wall clock, kept for correlating with external logs.
#[derive(Clone, Debug, Serialize)]
pub struct ActionRecord {
    pub state: StateId,
    pub action: StateAction,
    pub at: f64,
    pub timestamp: DateTime<Utc>,
}

/// The most recent lifecycle actions delivered by a machine, oldest first.
///
/// The history is capped: once full, recording a new action evicts the
/// oldest. It exists purely for diagnostics (snapshots, debugging overlays)
/// and never drives behavior.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use stackfsm::{ActionHistory, ActionRecord, MachineState, StateAction, StateId};
///
/// struct Patrol;
/// impl MachineState for Patrol {}
///
/// let mut history = ActionHistory::new();
/// history.record(ActionRecord {
///     state: StateId::of::<Patrol>(),
///     action: StateAction::Begin,
///     at: 0.0,
///     timestamp: Utc::now(),
/// });
///
/// assert_eq!(history.len(), 1);
/// assert_eq!(history.latest().unwrap().action, StateAction::Begin);
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct ActionHistory {
    records: VecDeque<ActionRecord>,
    capacity: usize,
}

impl ActionHistory {
    /// An empty history with the default capacity of
    /// [`MAX_ACTION_HISTORY`] records.
    pub fn new() -> Self {
        Self::with_capacity(MAX_ACTION_HISTORY)
    }

    /// An empty history keeping at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        ActionHistory {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Appends a record, evicting the oldest if the history is full.
    pub fn record(&mut self, record: ActionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records in delivery order, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter()
    }

    /// The most recently delivered action, if any.
    pub fn latest(&self) -> Option<&ActionRecord> {
        self.records.back()
    }

    /// Game-time seconds between the oldest and newest retained records.
    pub fn span(&self) -> Option<f64> {
        match (self.records.front(), self.records.back()) {
            (Some(first), Some(last)) => Some(last.at - first.at),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineState;

    struct Sentinel;
    impl MachineState for Sentinel {}

    fn record(action: StateAction, at: f64) -> ActionRecord {
        ActionRecord {
            state: StateId::of::<Sentinel>(),
            action,
            at,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn records_preserve_delivery_order() {
        let mut history = ActionHistory::new();
        history.record(record(StateAction::Begin, 0.0));
        history.record(record(StateAction::Pause, 1.0));
        history.record(record(StateAction::Resume, 2.0));

        let actions: Vec<_> = history.records().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![StateAction::Begin, StateAction::Pause, StateAction::Resume]
        );
        assert_eq!(history.latest().unwrap().action, StateAction::Resume);
        assert_eq!(history.span(), Some(2.0));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut history = ActionHistory::with_capacity(3);
        history.record(record(StateAction::Begin, 0.0));
        history.record(record(StateAction::Pause, 1.0));
        history.record(record(StateAction::Resume, 2.0));
        history.record(record(StateAction::End, 3.0));

        assert_eq!(history.len(), 3);
        let actions: Vec<_> = history.records().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![StateAction::Pause, StateAction::Resume, StateAction::End]
        );
    }

    #[test]
    fn default_capacity_is_bounded() {
        let mut history = ActionHistory::new();
        for i in 0..250 {
            history.record(record(StateAction::Begin, i as f64));
        }
        assert_eq!(history.len(), MAX_ACTION_HISTORY);
        assert_eq!(history.records().next().unwrap().at, 150.0);
    }

    #[test]
    fn serializes_to_json() {
        let mut history = ActionHistory::with_capacity(2);
        history.record(record(StateAction::Begin, 0.5));
        let json = serde_json::to_string(&history).unwrap();
        assert!(json.contains("\"Sentinel\""));
        assert!(json.contains("\"Begin\""));
    }
}
