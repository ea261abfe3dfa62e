//! Identity of concrete machine-state types.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

use crate::machine::MachineState;

/// Identifies a machine state by its concrete Rust type.
///
/// States are registered at most once per type, the stack stores `StateId`s,
/// and every transition operation targets a type. The id carries the type
/// name purely for diagnostics; equality and hashing use the `TypeId` alone.
///
/// # Example
///
/// ```
/// use stackfsm::{MachineState, StateId};
///
/// struct Patrol;
/// impl MachineState for Patrol {}
///
/// struct Combat;
/// impl MachineState for Combat {}
///
/// assert_eq!(StateId::of::<Patrol>(), StateId::of::<Patrol>());
/// assert_ne!(StateId::of::<Patrol>(), StateId::of::<Combat>());
/// assert_eq!(StateId::of::<Patrol>().short_name(), "Patrol");
/// ```
#[derive(Clone, Copy)]
pub struct StateId {
    ty: TypeId,
    name: &'static str,
}

impl StateId {
    /// The id of the concrete state type `S`.
    pub fn of<S: MachineState>() -> Self {
        StateId {
            ty: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    /// The fully qualified type name, e.g. `my_game::ai::Patrol`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The unqualified type name, e.g. `Patrol`. Used in logs and snapshots.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }

    /// True if this id denotes the concrete type `S`.
    pub fn is<S: MachineState>(&self) -> bool {
        self.ty == TypeId::of::<S>()
    }
}

impl PartialEq for StateId {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

impl Eq for StateId {}

impl Hash for StateId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl Serialize for StateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.short_name())
    }
}
