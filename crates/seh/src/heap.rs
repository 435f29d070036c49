use std::{
    any::Any,
    cell::Cell,
    collections::BTreeMap,
    fmt,
    mem::{self, size_of},
};

use crate::{
    exception_private::{ExceptionValue, ExceptionView},
    resource::{ResourceError, ResourceTracker},
};

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap, reserved ones included.
    pub live_objects: usize,
    /// Live objects pinned by the engine (the out-of-memory reserve).
    pub pinned_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by type name (e.g. "Exception", "Str").
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Number of objects finalized since the heap was created.
    pub finalized: usize,
    /// Resource tracker allocation count, if the tracker records it.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records it.
    pub tracker_memory_bytes: Option<usize>,
}

/// Handle to an entry in the heap arena.
///
/// A handle is only meaningful while the entry it names is live; using it after the
/// final release is a programming error and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Method table for user-defined heap objects.
///
/// Every slot is either required by the trait or has a default, so an object cannot be
/// constructed with a missing entry. The heap calls `finalize` exactly once, when the
/// last owner releases the object, then reclaims the slot and finally releases every
/// handle reported by `collect_refs`.
pub trait HeapObject: fmt::Debug + Any {
    /// Name used in heap statistics and diagnostics.
    fn type_name(&self) -> &'static str;

    /// Approximate size in bytes, reported to the resource tracker.
    fn estimate_size(&self) -> usize {
        mem::size_of_val(self)
    }

    /// Pushes the handles this object owns.
    fn collect_refs(&self, _refs: &mut Vec<HeapId>) {}

    /// Destructor hook.
    fn finalize(&mut self) {}
}

/// Immutable reference-counted string, used for exception messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Str(Box<str>);

impl Str {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Payload of a heap entry. Built-in kinds dispatch by `match`; user kinds go through
/// their [`HeapObject`] method table.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    Exception(ExceptionValue),
    Object(Box<dyn HeapObject>),
}

impl HeapData {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::Exception(_) => "Exception",
            Self::Object(obj) => obj.type_name(),
        }
    }

    fn estimate_size(&self) -> usize {
        size_of::<HeapValue>()
            + match self {
                Self::Str(s) => s.as_str().len(),
                Self::Exception(_) => 0,
                Self::Object(obj) => obj.estimate_size(),
            }
    }

    fn finalize(&mut self) {
        if let Self::Object(obj) = self {
            obj.finalize();
        }
    }

    fn collect_refs(&self, refs: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) => {}
            Self::Exception(exc) => exc.collect_refs(refs),
            Self::Object(obj) => obj.collect_refs(refs),
        }
    }
}

/// A live heap slot: the object header plus its payload.
#[derive(Debug)]
pub(crate) struct HeapValue {
    refcount: Cell<usize>,
    /// Pinned entries are owned by the engine for its whole lifetime and bypass the tracker.
    pinned: bool,
    data: HeapData,
}

/// Reference-counted arena that backs every runtime object.
///
/// Uses a free list to reuse slots from freed values, so long-running throw/catch loops
/// keep memory constant. When a value is freed via [`Heap::release`] its slot is pushed
/// on the free list; new allocations pop from the free list when available, otherwise
/// append.
///
/// Generic over `T: ResourceTracker`, which decides whether each allocation is allowed.
#[derive(Debug)]
pub struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `release`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    tracker: T,
    finalized: usize,
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a new heap with the given resource tracker.
    pub fn new(capacity: usize, tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            tracker,
            finalized: 0,
        }
    }

    /// Returns the resource tracker.
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Returns the resource tracker mutably, e.g. to tighten limits mid-run.
    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new entry with a reference count of one.
    ///
    /// Returns `Err(ResourceError)` if the tracker refuses the allocation; nothing is
    /// allocated in that case.
    pub(crate) fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        Ok(self.insert(data, false))
    }

    /// Allocates an entry the tracker never sees, for buffers reserved up front.
    pub(crate) fn allocate_pinned(&mut self, data: HeapData) -> HeapId {
        self.insert(data, true)
    }

    fn insert(&mut self, data: HeapData, pinned: bool) -> HeapId {
        let entry = HeapValue {
            refcount: Cell::new(1),
            pinned,
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Allocates a user-defined object behind its [`HeapObject`] method table.
    pub fn allocate_object(&mut self, object: impl HeapObject) -> Result<HeapId, ResourceError> {
        self.allocate(HeapData::Object(Box::new(object)))
    }

    /// Allocates an immutable string.
    pub fn allocate_str(&mut self, s: &str) -> Result<HeapId, ResourceError> {
        self.allocate(HeapData::Str(Str::from(s)))
    }

    /// Adds an owner. An absent handle is passed through untouched.
    ///
    /// # Panics
    /// Panics if the handle names an entry that has already been finalized.
    pub fn acquire(&self, id: Option<HeapId>) -> Option<HeapId> {
        if let Some(id) = id {
            self.inc_ref(id);
        }
        id
    }

    /// Removes an owner, finalizing the entry when it was the last one.
    ///
    /// Returns `true` if this call finalized the entry; an absent handle returns `false`.
    ///
    /// # Panics
    /// Panics if the handle names an entry that has already been finalized.
    pub fn release(&mut self, id: Option<HeapId>) -> bool {
        id.is_some_and(|id| self.dec_ref(id))
    }

    /// Increments the reference count of a live entry.
    ///
    /// Uses interior mutability for the refcount, so only shared access to the heap
    /// is required.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the entry has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: object already freed");
        value.refcount.set(value.refcount.get() + 1);
    }

    /// Decrements the reference count and finalizes the entry once it hits zero.
    ///
    /// Teardown order: the destructor hook runs, then the slot is reclaimed (free list
    /// plus tracker notification), then every handle the entry owned is released in turn.
    /// Children are released through a work list rather than recursion, so long cause
    /// chains cannot exhaust the stack.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the entry has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) -> bool {
        let root = id;
        let mut pending = vec![id];
        let mut finalized_root = false;
        while let Some(id) = pending.pop() {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                continue;
            }
            let mut value = slot.take().expect("Heap::dec_ref: object already freed");
            if id == root {
                finalized_root = true;
            }

            value.data.finalize();
            let mut children = Vec::new();
            value.data.collect_refs(&mut children);

            self.free_list.push(id);
            if !value.pinned {
                let data = &value.data;
                self.tracker.on_free(|| data.estimate_size());
            }
            self.finalized += 1;
            drop(value);

            // push in reverse so children are released in the order they were reported
            pending.extend(children.into_iter().rev());
        }
        finalized_root
    }

    /// Returns the current refcount of a live entry.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the entry has already been freed.
    #[must_use]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .expect("Heap::refcount: slot missing")
            .as_ref()
            .expect("Heap::refcount: object already freed")
            .refcount
            .get()
    }

    /// Returns whether the handle names a live entry.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    pub(crate) fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index())?.as_ref().map(|entry| &entry.data)
    }

    pub(crate) fn get_mut_if_live(&mut self, id: HeapId) -> Option<&mut HeapData> {
        self.entries.get_mut(id.index())?.as_mut().map(|entry| &mut entry.data)
    }

    /// Type name of a live entry, resolved through its method table.
    #[must_use]
    pub fn type_name(&self, id: HeapId) -> Option<&'static str> {
        self.get_if_live(id).map(HeapData::type_name)
    }

    /// Text of a live string entry.
    #[must_use]
    pub fn str(&self, id: HeapId) -> Option<&str> {
        match self.get_if_live(id)? {
            HeapData::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read-only view of a live exception entry, or `None` if `id` is not one.
    #[must_use]
    pub fn exception(&self, id: HeapId) -> Option<ExceptionView<'_>> {
        let HeapData::Exception(exc) = self.get_if_live(id)? else {
            return None;
        };
        let message = exc.message_id().and_then(|message_id| self.str(message_id));
        Some(ExceptionView::new(exc, message))
    }

    pub(crate) fn exception_value_mut(&mut self, id: HeapId) -> Option<&mut ExceptionValue> {
        match self.get_mut_if_live(id)? {
            HeapData::Exception(exc) => Some(exc),
            _ => None,
        }
    }

    /// Downcasts a live user object to its concrete type.
    #[must_use]
    pub fn object<O: HeapObject>(&self, id: HeapId) -> Option<&O> {
        match self.get_if_live(id)? {
            HeapData::Object(obj) => {
                let any: &dyn Any = obj.as_ref();
                any.downcast_ref::<O>()
            }
            _ => None,
        }
    }

    /// Mutable counterpart of [`Heap::object`].
    pub fn object_mut<O: HeapObject>(&mut self, id: HeapId) -> Option<&mut O> {
        match self.get_mut_if_live(id)? {
            HeapData::Object(obj) => {
                let any: &mut dyn Any = obj.as_mut();
                any.downcast_mut::<O>()
            }
            _ => None,
        }
    }

    /// Number of live entries, reserved buffers included.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Takes a snapshot of the current heap state.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        let mut pinned_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            if entry.pinned {
                pinned_objects += 1;
            }
            *objects_by_type.entry(entry.data.type_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            pinned_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            finalized: self.finalized,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }
}

/// Panics when the heap is dropped with unpinned entries still live, which means a
/// handle leaked somewhere.
#[cfg(feature = "ref-count-panic")]
impl<T: ResourceTracker> Drop for Heap<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let leaked: Vec<_> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|entry| !entry.pinned)
                    .map(|entry| format!("#{index} {} (refcount {})", entry.data.type_name(), entry.refcount.get()))
            })
            .collect();
        assert!(leaked.is_empty(), "Heap dropped with live entries: {}", leaked.join(", "));
    }
}

/// This trait represents types that contain a `Heap`; it allows the engine to
/// participate in the `HeapGuard` pattern.
pub trait ContainsHeap<T: ResourceTracker> {
    fn heap_mut(&mut self) -> &mut Heap<T>;
}

impl<T: ResourceTracker> ContainsHeap<T> for Heap<T> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Self {
        self
    }
}

/// Trait for values that own heap references and must release them explicitly.
///
/// Rust's `Drop` cannot release a handle because it has no access to the `Heap`.
/// Every owned handle must be released on every code path; prefer [`HeapGuard`] or
/// [`defer_release!`](crate::defer_release) over manual calls in each branch.
pub trait DropWithHeap<T: ResourceTracker> {
    /// Consume `self` and release every handle it owns.
    fn drop_with_heap(self, heap: &mut Heap<T>);
}

impl<T: ResourceTracker> DropWithHeap<T> for HeapId {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        heap.dec_ref(self);
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

/// RAII guard that releases a [`DropWithHeap`] value on every code path.
///
/// The guard's `Drop` impl calls [`DropWithHeap::drop_with_heap`], so cleanup happens
/// whether the scope exits normally, via `?`, or via an early return. On the success
/// path the value can be reclaimed with [`HeapGuard::into_inner`], which consumes the
/// guard without releasing anything.
pub struct HeapGuard<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> {
    // always `Some` until the guard is consumed or dropped
    value: Option<V>,
    heap: &'a mut H,
    _tracker: std::marker::PhantomData<T>,
}

impl<'a, T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> HeapGuard<'a, T, H, V> {
    /// Creates a new `HeapGuard` for the given value and heap owner.
    #[inline]
    pub fn new(value: V, heap: &'a mut H) -> Self {
        Self {
            value: Some(value),
            heap,
            _tracker: std::marker::PhantomData,
        }
    }

    /// Consumes the guard and returns the contained value without releasing it.
    #[inline]
    pub fn into_inner(mut self) -> V {
        self.value.take().expect("HeapGuard::into_inner: value already taken")
    }

    /// Borrows the value and the heap owner out of the guard.
    #[inline]
    pub fn as_parts(&mut self) -> (&V, &mut H) {
        (
            self.value.as_ref().expect("HeapGuard::as_parts: value already taken"),
            self.heap,
        )
    }

    /// Borrows just the heap owner out of the guard.
    #[inline]
    pub fn heap(&mut self) -> &mut H {
        self.heap
    }
}

impl<T: ResourceTracker, H: ContainsHeap<T>, V: DropWithHeap<T>> Drop for HeapGuard<'_, T, H, V> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            value.drop_with_heap(self.heap.heap_mut());
        }
    }
}

/// Ensures a [`DropWithHeap`] value is released when the current scope exits.
///
/// Creates a [`HeapGuard`] and rebinds `$value` as `&V` and `$heap` as `&mut H`.
///
/// # Limitation
///
/// The macro rebinds `$heap` as a new `let` binding, so it cannot be used when `$heap`
/// is `self`. In `&mut self` methods, first assign `let this = self;` and pass `this`.
#[macro_export]
macro_rules! defer_release {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::HeapGuard::new($value, $heap);
        #[allow(
            clippy::allow_attributes,
            reason = "the reborrowed parts may not both be used in every case, so allow unused vars to avoid warnings"
        )]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts();
    };
}
