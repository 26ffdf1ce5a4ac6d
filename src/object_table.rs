//! The per-rank table of live mirrored instances, indexed by object id.

use crate::error::PmiError;
use crate::registry::Handle;
use crate::types::{ClassId, ObjectId};

/// A live instance and the class it was created as.
pub struct Slot {
    pub class_id: ClassId,
    pub handle: Handle,
}

/// Dense table of object slots. Destroyed slots are emptied, never removed,
/// so the table only grows.
#[derive(Default)]
pub struct ObjectTable {
    slots: Vec<Option<Slot>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `id` can receive a new object: it must either be the next
    /// slot past the end, or an emptied slot.
    pub fn check_vacant(&self, id: ObjectId) -> Result<(), PmiError> {
        match self.slots.get(id.index()) {
            Some(Some(_)) => Err(PmiError::Internal(format!(
                "has object id {} already defined",
                id
            ))),
            Some(None) => Ok(()),
            None if id.index() == self.slots.len() => Ok(()),
            None => Err(PmiError::Internal(format!(
                "has object id {} overshooting the object table (size {})",
                id,
                self.slots.len()
            ))),
        }
    }

    /// Stores a new object at `id`, appending if `id` is the table length
    /// and filling an emptied slot otherwise.
    pub fn insert(&mut self, id: ObjectId, class_id: ClassId, handle: Handle) -> Result<(), PmiError> {
        self.check_vacant(id)?;
        let slot = Some(Slot { class_id, handle });
        if id.index() == self.slots.len() {
            self.slots.push(slot);
        } else {
            self.slots[id.index()] = slot;
        }
        Ok(())
    }

    pub fn get(&self, id: ObjectId) -> Option<&Slot> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Empties slot `id` and returns what it held.
    pub fn take(&mut self, id: ObjectId) -> Option<Slot> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Number of slots, live or emptied.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live_ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ObjectId(index as u32))
            .collect()
    }
}
