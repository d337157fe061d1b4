//! Switch, interface and link value types.
//!
//! Every entity carries two independent planes: administrative intent
//! (`enabled`) and observed connectivity (`active`). Changing one never
//! touches the other. All transitions report whether they changed
//! anything so callers can keep repeated operations side-effect free.

mod interface;
mod link;
mod switch;

pub use interface::Interface;
pub use link::{strip_runtime_keys, Link, RUNTIME_METADATA_KEYS};
pub use switch::{Switch, SwitchDescription};

use topo_types::{EntityKind, EntityStatus, Metadata};

/// Shared behaviour of switches, interfaces and links.
pub trait Entity {
    /// Class label, fixed per type.
    const KIND: EntityKind;

    fn entity_id(&self) -> String;

    fn is_enabled(&self) -> bool;

    fn is_active(&self) -> bool;

    /// Mutable access to `(enabled, active)`.
    fn planes_mut(&mut self) -> (&mut bool, &mut bool);

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    fn enable(&mut self) -> bool {
        set_flag(self.planes_mut().0, true)
    }

    fn disable(&mut self) -> bool {
        set_flag(self.planes_mut().0, false)
    }

    fn activate(&mut self) -> bool {
        set_flag(self.planes_mut().1, true)
    }

    fn deactivate(&mut self) -> bool {
        set_flag(self.planes_mut().1, false)
    }

    /// Status from this entity's own planes only.
    fn own_status(&self) -> EntityStatus {
        EntityStatus::derive(self.is_enabled(), self.is_active())
    }

    /// Merges `entries` into the metadata map, overwriting existing keys.
    fn extend_metadata(&mut self, entries: Metadata) {
        self.metadata_mut().extend(entries);
    }

    /// Removes `key`, returning whether it was present.
    fn remove_metadata(&mut self, key: &str) -> bool {
        self.metadata_mut().remove(key).is_some()
    }
}

fn set_flag(flag: &mut bool, value: bool) -> bool {
    let changed = *flag != value;
    *flag = value;
    changed
}
