//! Label tags naming cooperative sub-routines within a state.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The namespace every label tag must live under.
pub const LABEL_NAMESPACE: &str = "Label.";

/// A hierarchical tag naming one label of a machine state.
///
/// Labels follow a dotted namespace: every valid tag starts with `Label.`
/// and carries a non-empty suffix, e.g. `Label.Patrol` or
/// `Label.Combat.Melee`. Each state registers routines for its labels in
/// [`MachineState::register_labels`](crate::MachineState::register_labels);
/// exactly one label is active per state at a time, and every state starts
/// at [`Label::DEFAULT`].
///
/// # Example
///
/// ```
/// use stackfsm::Label;
///
/// const PATROL: Label = Label::from_static("Label.Patrol");
///
/// assert!(PATROL.is_valid_tag());
/// assert!(Label::DEFAULT.is_valid_tag());
/// assert!(!Label::from_static("Patrol").is_valid_tag());
/// assert!(!Label::from_static("Label.").is_valid_tag());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Label(Cow<'static, str>);

impl Label {
    /// The label every state starts at and returns to when removed from the
    /// stack.
    pub const DEFAULT: Label = Label::from_static("Label.Default");

    /// Builds a label from a static tag string. Validation happens at
    /// registration and transition time, not construction.
    pub const fn from_static(tag: &'static str) -> Self {
        Label(Cow::Borrowed(tag))
    }

    /// Builds a label from an owned or borrowed tag string.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Label(tag.into())
    }

    /// The raw tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the tag sits in the label namespace with a non-empty suffix.
    pub fn is_valid_tag(&self) -> bool {
        self.0
            .strip_prefix(LABEL_NAMESPACE)
            .is_some_and(|suffix| !suffix.is_empty())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Label {
    fn from(tag: &'static str) -> Self {
        Label(Cow::Borrowed(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_label_is_valid() {
        assert!(Label::DEFAULT.is_valid_tag());
        assert_eq!(Label::DEFAULT.as_str(), "Label.Default");
    }

    #[test]
    fn namespace_is_enforced() {
        assert!(Label::from_static("Label.Patrol").is_valid_tag());
        assert!(Label::from_static("Label.Combat.Melee").is_valid_tag());
        assert!(!Label::from_static("Patrol").is_valid_tag());
        assert!(!Label::from_static("Label.").is_valid_tag());
        assert!(!Label::from_static("").is_valid_tag());
        assert!(!Label::from_static("label.lowercase").is_valid_tag());
    }

    #[test]
    fn owned_and_static_tags_compare_equal() {
        let owned = Label::new(String::from("Label.Patrol"));
        assert_eq!(owned, Label::from_static("Label.Patrol"));
    }

    #[test]
    fn serde_round_trip() {
        let label = Label::from_static("Label.Search");
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"Label.Search\"");
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
    }
}
