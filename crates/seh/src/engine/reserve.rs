use crate::{
    exception_private::{CodeLoc, ExcType, ExceptionValue},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
};

/// Out-of-memory exceptions allocated when the engine is created.
///
/// Each buffer is pinned: the reserve holds one reference for the engine's lifetime and
/// the heap never reports it to the tracker. A buffer whose refcount is back to one is
/// free for reuse. Reserved exceptions carry no message, so reporting allocation failure
/// allocates nothing.
#[derive(Debug)]
pub(super) struct Reserve {
    buffers: Vec<HeapId>,
}

impl Reserve {
    pub fn new<T: ResourceTracker>(heap: &mut Heap<T>, count: usize) -> Self {
        let buffers = (0..count)
            .map(|_| {
                let value = ExceptionValue::new(ExcType::OutOfMemoryException, None, CodeLoc::new("<reserve>", 0), None);
                heap.allocate_pinned(HeapData::Exception(value))
            })
            .collect();
        Self { buffers }
    }

    /// Takes a free buffer, stamps it with `loc` and acquires it for the caller.
    ///
    /// When every buffer is in use the last one is shared without restamping, since
    /// its current holders still observe its location. The flag reports that case.
    pub fn claim<T: ResourceTracker>(&self, heap: &mut Heap<T>, loc: CodeLoc) -> (HeapId, bool) {
        if let Some(&id) = self.buffers.iter().find(|&&id| heap.refcount(id) == 1) {
            heap.exception_value_mut(id)
                .expect("Reserve::claim: reserved buffer is not an exception")
                .set_loc(loc);
            heap.inc_ref(id);
            return (id, false);
        }
        let id = *self.buffers.last().expect("Reserve::claim: reserve is empty");
        heap.inc_ref(id);
        (id, true)
    }

    #[cfg(test)]
    pub fn buffers(&self) -> &[HeapId] {
        &self.buffers
    }
}
