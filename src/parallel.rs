use crate::types::{ClassId, ObjectId};
use std::fmt;
use std::marker::PhantomData;

/// The controller's handle to an instance of `T` mirrored on every rank.
///
/// Returned by [`crate::Pmi::create`] and consumed by
/// [`crate::Pmi::destroy`]. Dropping the handle without destroying it keeps
/// the instance alive on every rank until the process exits.
#[must_use = "a parallel object is only released by destroying it through its context"]
pub struct ParallelObject<T> {
    id: ObjectId,
    class_id: ClassId,
    subject: PhantomData<fn() -> T>,
}

impl<T> ParallelObject<T> {
    pub(crate) fn new(id: ObjectId, class_id: ClassId) -> Self {
        Self {
            id,
            class_id,
            subject: PhantomData,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }
}

impl<T> fmt::Debug for ParallelObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelObject")
            .field("type", &std::any::type_name::<T>())
            .field("id", &self.id)
            .field("class_id", &self.class_id)
            .finish()
    }
}
