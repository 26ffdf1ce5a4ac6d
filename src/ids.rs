//! Issues class, method and object identities on the controller.
//!
//! Class and method ids count up from zero and are never reused. Object ids
//! come from an [`ObjectIdPool`], which always hands out the smallest id not
//! currently in use, so a create/destroy pattern keeps ids dense.

use crate::error::PmiError;
use crate::types::{ClassId, MethodId, ObjectId};
use std::collections::BTreeSet;

/// Smallest-available-id allocator for object slots.
#[derive(Debug, Default)]
pub struct ObjectIdPool {
    free: BTreeSet<u32>,
    next: u32,
}

impl ObjectIdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the smallest id that is not live.
    pub fn allocate(&mut self) -> ObjectId {
        match self.free.iter().next().copied() {
            Some(id) => {
                self.free.remove(&id);
                ObjectId(id)
            }
            None => {
                let id = self.next;
                self.next += 1;
                ObjectId(id)
            }
        }
    }

    /// Returns an id to the pool. Freeing an id that is not live is an
    /// internal error.
    pub fn free(&mut self, id: ObjectId) -> Result<(), PmiError> {
        if id.0 >= self.next || self.free.contains(&id.0) {
            return Err(PmiError::Internal(format!(
                "object id {} is not allocated and cannot be freed",
                id
            )));
        }
        self.free.insert(id.0);
        Ok(())
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        id.0 < self.next && !self.free.contains(&id.0)
    }

    /// Number of ids currently allocated.
    pub fn live_count(&self) -> usize {
        self.next as usize - self.free.len()
    }

    /// One past the largest id ever handed out.
    pub fn high_water(&self) -> u32 {
        self.next
    }
}

#[derive(Debug, Default)]
pub struct IdAllocator {
    next_class: u32,
    next_method: u32,
    objects: ObjectIdPool,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_class_id(&mut self) -> ClassId {
        let id = ClassId(self.next_class);
        self.next_class += 1;
        id
    }

    pub fn next_method_id(&mut self) -> MethodId {
        let id = MethodId(self.next_method);
        self.next_method += 1;
        id
    }

    pub fn allocate_object(&mut self) -> ObjectId {
        self.objects.allocate()
    }

    pub fn free_object(&mut self, id: ObjectId) -> Result<(), PmiError> {
        self.objects.free(id)
    }

    pub fn objects(&self) -> &ObjectIdPool {
        &self.objects
    }
}
