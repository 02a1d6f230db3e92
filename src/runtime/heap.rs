//! Managed heap and garbage-collector contract.
//!
//! This module provides [`ManagedHeap`], the heap the VM allocates function objects, module
//! records and strings on. The patch engine only ever talks to it through the
//! [`GarbageCollector`] trait:
//!
//! - **pin** - keep an object alive in the global handle list until the returned
//!   [`ScopedHandle`] is dropped
//! - **for_each_live_object** - visit every object on the heap exactly once
//! - **await_background_sweep** - block until a concurrent sweep has finished
//! - **collect_full** - reclaim every object that nothing outside the heap refers to
//!
//! # Interior Mutability
//!
//! The object table sits behind a `RwLock`, so every operation takes `&self` and a heap can be
//! shared through an `Arc` between the runtime and the patch engine.
//!
//! # Reachability
//!
//! Objects are reference counted. An object whose only owner is the heap itself is
//! unreachable and is reclaimed by [`GarbageCollector::collect_full`]. Pinned objects are
//! owned by the handle list and therefore survive.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, RwLock,
    },
};

use crate::runtime::{
    constpool::ConstantPoolRc,
    function::{ClosureRc, FunctionTemplateRc},
    record::ModuleRecordRc,
};

/// Opaque handle of a heap object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u64);

impl HeapRef {
    /// Creates a new heap reference with the given ID
    #[must_use]
    pub fn new(id: u64) -> Self {
        HeapRef(id)
    }

    /// Returns the internal ID of this heap reference
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// Object stored on the managed heap.
///
/// Only the kinds the patch engine has to tell apart are modelled; every variant is a cheap
/// `Arc` clone.
#[derive(Clone, Debug)]
pub enum HeapObject {
    /// An executable closure
    Closure(ClosureRc),
    /// A class member template
    FunctionTemplate(FunctionTemplateRc),
    /// A resolved constant pool
    ConstantPool(ConstantPoolRc),
    /// A string
    String(Arc<str>),
    /// A module record
    ModuleRecord(ModuleRecordRc),
}

impl HeapObject {
    /// Short name of the object kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Closure(_) => "Closure",
            HeapObject::FunctionTemplate(_) => "FunctionTemplate",
            HeapObject::ConstantPool(_) => "ConstantPool",
            HeapObject::String(_) => "String",
            HeapObject::ModuleRecord(_) => "ModuleRecord",
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            HeapObject::Closure(object) => Arc::strong_count(object),
            HeapObject::FunctionTemplate(object) => Arc::strong_count(object),
            HeapObject::ConstantPool(object) => Arc::strong_count(object),
            HeapObject::String(object) => Arc::strong_count(object),
            HeapObject::ModuleRecord(object) => Arc::strong_count(object),
        }
    }

    /// True if both values refer to the same object
    #[must_use]
    pub fn same_object(&self, other: &HeapObject) -> bool {
        match (self, other) {
            (HeapObject::Closure(a), HeapObject::Closure(b)) => Arc::ptr_eq(a, b),
            (HeapObject::FunctionTemplate(a), HeapObject::FunctionTemplate(b)) => {
                Arc::ptr_eq(a, b)
            }
            (HeapObject::ConstantPool(a), HeapObject::ConstantPool(b)) => Arc::ptr_eq(a, b),
            (HeapObject::String(a), HeapObject::String(b)) => Arc::ptr_eq(a, b),
            (HeapObject::ModuleRecord(a), HeapObject::ModuleRecord(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapObject::String(value) => write!(f, "String({value:?})"),
            HeapObject::ModuleRecord(record) => {
                write!(f, "ModuleRecord({}@{})", record.record_name(), record.file_name())
            }
            HeapObject::ConstantPool(pool) => {
                write!(f, "ConstantPool({}#{})", pool.module_name(), pool.index())
            }
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// The contract the patch engine needs from the garbage collector
pub trait GarbageCollector: Send + Sync {
    /// Registers `object` in the global handle list; it stays alive until the handle drops
    fn pin(&self, object: HeapObject) -> ScopedHandle;

    /// Calls `visitor` once for every object on the heap
    fn for_each_live_object(&self, visitor: &mut dyn FnMut(HeapRef, &HeapObject));

    /// Blocks until no background sweep is running
    fn await_background_sweep(&self);

    /// Reclaims every unreachable object, returns the number reclaimed
    fn collect_full(&self) -> usize;
}

type HandleTable = Mutex<BTreeMap<u64, HeapObject>>;

/// Strong reference registered in the heap's global handle list.
///
/// Unlike a stack-scoped handle it may be stored anywhere (the patch engine keeps them in
/// the patch session) and releases the object when dropped.
pub struct ScopedHandle {
    id: u64,
    object: HeapObject,
    table: Arc<HandleTable>,
}

impl ScopedHandle {
    /// The pinned object
    #[must_use]
    pub fn object(&self) -> &HeapObject {
        &self.object
    }
}

impl Drop for ScopedHandle {
    fn drop(&mut self) {
        lock!(self.table).remove(&self.id);
    }
}

impl fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedHandle({}, {})", self.id, self.object)
    }
}

/// Guard that defers collections while raw tables are being inspected and mutated
pub struct NoGcScope<'a> {
    heap: &'a ManagedHeap,
}

impl Drop for NoGcScope<'_> {
    fn drop(&mut self) {
        self.heap.no_gc_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Iterator over heap objects.
///
/// This iterator provides lazy access to heap objects. It collects only the
/// object keys upfront (cheap `u64` copies), then looks up and clones each
/// object lazily as iteration proceeds. Objects reclaimed in between are skipped.
pub struct HeapIter<'a> {
    heap: &'a ManagedHeap,
    keys: std::vec::IntoIter<u64>,
}

impl Iterator for HeapIter<'_> {
    type Item = (HeapRef, HeapObject);

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.keys.by_ref() {
            let state = read_lock!(self.heap.state);
            if let Some(object) = state.objects.get(&id) {
                return Some((HeapRef::new(id), object.clone()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}

#[derive(Debug, Default)]
struct HeapState {
    objects: HashMap<u64, HeapObject>,
}

/// Reference-counted managed heap with a global handle list
pub struct ManagedHeap {
    state: RwLock<HeapState>,
    next_id: AtomicU64,
    handles: Arc<HandleTable>,
    next_handle: AtomicU64,
    no_gc_depth: AtomicUsize,
    sweeping: Mutex<bool>,
    sweep_done: Condvar,
}

impl ManagedHeap {
    /// Creates an empty heap
    #[must_use]
    pub fn new() -> Self {
        ManagedHeap {
            state: RwLock::new(HeapState::default()),
            next_id: AtomicU64::new(1),
            handles: Arc::new(Mutex::new(BTreeMap::new())),
            next_handle: AtomicU64::new(1),
            no_gc_depth: AtomicUsize::new(0),
            sweeping: Mutex::new(false),
            sweep_done: Condvar::new(),
        }
    }

    /// Places `object` on the heap
    pub fn alloc(&self, object: HeapObject) -> HeapRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        write_lock!(self.state).objects.insert(id, object);
        HeapRef::new(id)
    }

    /// Allocates a string
    pub fn alloc_string(&self, value: &str) -> HeapRef {
        self.alloc(HeapObject::String(Arc::from(value)))
    }

    /// Returns the object behind `heap_ref`
    #[must_use]
    pub fn get(&self, heap_ref: HeapRef) -> Option<HeapObject> {
        read_lock!(self.state).objects.get(&heap_ref.id()).cloned()
    }

    /// Returns `true` if the reference exists on the heap
    #[must_use]
    pub fn contains(&self, heap_ref: HeapRef) -> bool {
        read_lock!(self.state).objects.contains_key(&heap_ref.id())
    }

    /// Returns the number of allocated objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        read_lock!(self.state).objects.len()
    }

    /// Returns a lazy iterator over all heap objects, in allocation order
    pub fn iter(&self) -> HeapIter<'_> {
        let mut keys: Vec<u64> = read_lock!(self.state).objects.keys().copied().collect();
        keys.sort_unstable();
        HeapIter {
            heap: self,
            keys: keys.into_iter(),
        }
    }

    /// Number of objects in the global handle list
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        lock!(self.handles).len()
    }

    /// True if `object` is currently pinned
    #[must_use]
    pub fn is_pinned(&self, object: &HeapObject) -> bool {
        lock!(self.handles)
            .values()
            .any(|pinned| pinned.same_object(object))
    }

    /// Enters a region in which collections are deferred
    #[must_use]
    pub fn no_gc_scope(&self) -> NoGcScope<'_> {
        self.no_gc_depth.fetch_add(1, Ordering::SeqCst);
        NoGcScope { heap: self }
    }

    /// True while any [`NoGcScope`] is alive
    #[must_use]
    pub fn in_no_gc_scope(&self) -> bool {
        self.no_gc_depth.load(Ordering::SeqCst) > 0
    }

    /// Marks a concurrent sweep as running
    pub fn begin_background_sweep(&self) {
        *lock!(self.sweeping) = true;
    }

    /// Marks the concurrent sweep as finished and wakes all waiters
    pub fn finish_background_sweep(&self) {
        *lock!(self.sweeping) = false;
        self.sweep_done.notify_all();
    }

    /// True while a concurrent sweep is running
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        *lock!(self.sweeping)
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHeap")
            .field("objects", &self.object_count())
            .field("pinned", &self.pinned_count())
            .finish_non_exhaustive()
    }
}

impl GarbageCollector for ManagedHeap {
    fn pin(&self, object: HeapObject) -> ScopedHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        lock!(self.handles).insert(id, object.clone());
        ScopedHandle {
            id,
            object,
            table: self.handles.clone(),
        }
    }

    fn for_each_live_object(&self, visitor: &mut dyn FnMut(HeapRef, &HeapObject)) {
        for (heap_ref, object) in self.iter() {
            visitor(heap_ref, &object);
        }
    }

    fn await_background_sweep(&self) {
        let mut sweeping = lock!(self.sweeping);
        while *sweeping {
            sweeping = self
                .sweep_done
                .wait(sweeping)
                .expect("Failed to wait for sweep");
        }
    }

    fn collect_full(&self) -> usize {
        if self.in_no_gc_scope() {
            log::warn!("Full collection requested inside a no-GC scope, skipped");
            return 0;
        }
        self.await_background_sweep();

        let mut reclaimed = 0;
        loop {
            // Dropping one object can make others unreachable, so sweep to a fixpoint.
            let garbage: Vec<HeapObject> = {
                let mut state = write_lock!(self.state);
                let dead: Vec<u64> = state
                    .objects
                    .iter()
                    .filter(|(_, object)| object.strong_count() == 1)
                    .map(|(id, _)| *id)
                    .collect();
                dead.iter()
                    .filter_map(|id| state.objects.remove(id))
                    .collect()
            };

            if garbage.is_empty() {
                break;
            }
            reclaimed += garbage.len();
        }

        log::debug!("Full collection reclaimed {reclaimed} objects");
        reclaimed
    }
}
