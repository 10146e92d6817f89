//! Reference-counted arena holding every boxed host object.
//!
//! The host object model the compiled code links against is a refcounted
//! heap of tagged boxed objects. Here it is an arena: objects live in slots
//! addressed by [`HeapId`], each with an explicit reference count. Freed
//! slots go on a free list and are reused by later allocations.
//!
//! Reference discipline mirrors the C ABI: whoever holds a `HeapId` as an
//! owning reference must pair it with a `dec_ref`. Container types release
//! their children recursively when their own count reaches zero.

use std::{cell::Cell, collections::BTreeMap};

use num_bigint::BigInt;
use smallvec::SmallVec;

use crate::{
    builder::GenericAlias,
    exception::ExcInstance,
    function::{BoundMethod, CodeObject, CompiledFunction, FrameObject, TracebackEntry},
    types::{Bytes, Dict, Instance, List, Str, Tuple, TypeObject},
};

/// Scratch buffer for collecting the references an object owns during
/// recursive release. Most objects hold only a few.
pub(crate) type ChildIds = SmallVec<[HeapId; 8]>;

/// Index of an object slot in the heap arena.
///
/// `HeapId` is `Copy` and carries no ownership by itself; the reference
/// count lives in the slot. Low-bit tagging in [`crate::tagged`] relies on
/// the index fitting in a machine word minus one bit, which the arena
/// guarantees in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Rebuilds an id from a raw index. Used by the tagged-int decoding path;
    /// the caller is responsible for validity.
    #[inline]
    #[must_use]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Boxed object payloads.
///
/// Every variant corresponds to a host object the runtime manipulates. The
/// type tag the host would store in an object header is the enum
/// discriminant.
#[derive(Debug)]
pub enum HeapData {
    /// Arbitrary-precision integer; the boxed side of the tagged-int pair.
    Int(BigInt),
    /// Unicode string with three-kind codepoint accounting.
    Str(Str),
    /// Immutable byte string.
    Bytes(Bytes),
    /// Mutable sequence of values.
    List(List),
    /// Immutable sequence of values.
    Tuple(Tuple),
    /// Insertion-ordered hash map.
    Dict(Dict),
    /// A type object, either synthesized from a template or built in.
    Type(TypeObject),
    /// An instance of a compiled class, with raw attribute storage.
    Instance(Instance),
    /// A parametrized generic (`Base[T]`) appearing in a declared base list.
    GenericAlias(GenericAlias),
    /// A compiled function object.
    Function(CompiledFunction),
    /// A compiled function bound to an instance.
    BoundMethod(BoundMethod),
    /// A materialized exception.
    Exception(ExcInstance),
    /// A synthetic code object for traceback stitching.
    Code(CodeObject),
    /// A synthetic frame for traceback stitching.
    Frame(FrameObject),
    /// One link of a traceback chain.
    Traceback(TracebackEntry),
}

impl HeapData {
    /// Returns the Python-visible type name of this object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Type(_) => "type",
            Self::Instance(_) => "object",
            Self::GenericAlias(_) => "_GenericAlias",
            Self::Function(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::Exception(_) => "Exception",
            Self::Code(_) => "code",
            Self::Frame(_) => "frame",
            Self::Traceback(_) => "traceback",
        }
    }

    /// Collects the heap references this object owns, for recursive release.
    fn child_ids(&self, out: &mut ChildIds) {
        match self {
            Self::Int(_) | Self::Str(_) | Self::Bytes(_) | Self::Code(_) => {}
            Self::List(list) => list.child_ids(out),
            Self::Tuple(tuple) => tuple.child_ids(out),
            Self::Dict(dict) => dict.child_ids(out),
            Self::Type(ty) => ty.child_ids(out),
            Self::Instance(inst) => inst.child_ids(out),
            Self::GenericAlias(alias) => alias.child_ids(out),
            Self::Function(func) => func.child_ids(out),
            Self::BoundMethod(bm) => bm.child_ids(out),
            Self::Exception(exc) => exc.child_ids(out),
            Self::Frame(frame) => frame.child_ids(out),
            Self::Traceback(tb) => tb.child_ids(out),
        }
    }
}

/// One occupied arena slot: payload plus reference count.
///
/// The count uses `Cell` so `inc_ref` needs only shared access; this avoids
/// borrow conflicts during attribute and MRO walks, the same reason the
/// count is interior-mutable in the host ABI.
#[derive(Debug)]
struct HeapEntry {
    refcount: Cell<usize>,
    data: HeapData,
}

/// Snapshot of heap state at a point in time.
///
/// Used by tests to check that operations balance their reference counts:
/// take a snapshot, run the operation, drop its results, and compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by `HeapData` variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// The arena itself.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    /// Creates an empty heap with room for `capacity` objects before the
    /// first reallocation.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
        }
    }

    /// Allocates a new heap entry with a reference count of one.
    ///
    /// Allocation failure is fatal by policy (the runtime aborts on
    /// out-of-memory), so this returns the id directly.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let new_entry = HeapEntry {
            refcount: Cell::new(1),
            data,
        };
        if let Some(id) = self.free_list.pop() {
            // Reuse a freed slot
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(new_entry));
            id
        }
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// # Panics
    /// Panics if the id is invalid or the object has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let entry = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: object already freed");
        entry.refcount.set(entry.refcount.get() + 1);
    }

    /// Decrements the reference count and frees the object (plus children)
    /// once it hits zero.
    ///
    /// Freed slot ids go on the free list for reuse. Child release recurses;
    /// reference chains in this runtime are shallow (traceback links are the
    /// deepest).
    ///
    /// # Panics
    /// Panics if the id is invalid or the object has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let entry = {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref: object already freed")
        };

        self.free_list.push(id);

        let mut child_ids = ChildIds::new();
        entry.data.child_ids(&mut child_ids);
        drop(entry);
        for child_id in child_ids {
            self.dec_ref(child_id);
        }
    }

    /// Returns an immutable reference to the data stored at the given id.
    ///
    /// # Panics
    /// Panics if the id is invalid or the object has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .map(|entry| &entry.data)
            .expect("Heap::get: object already freed")
    }

    /// Returns a mutable reference to the data stored at the given id.
    ///
    /// # Panics
    /// Panics if the id is invalid or the object has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .map(|entry| &mut entry.data)
            .expect("Heap::get_mut: object already freed")
    }

    /// Temporarily removes the object at `id` and runs `f` with both the
    /// payload and the rest of the heap.
    ///
    /// Container operations need simultaneous access to the container and to
    /// the objects its keys/values point at (hashing a key, comparing two
    /// strings). Taking the entry out for the duration sidesteps the borrow
    /// conflict. Re-entering on the same id panics.
    pub fn with_taken<R>(&mut self, id: HeapId, f: impl FnOnce(&mut Self, &mut HeapData) -> R) -> R {
        let mut entry = self
            .entries
            .get_mut(id.index())
            .expect("Heap::with_taken: slot missing")
            .take()
            .expect("Heap::with_taken: object already freed or re-entered");
        let result = f(self, &mut entry.data);
        self.entries[id.index()] = Some(entry);
        result
    }

    /// Returns the current reference count of an object. Test helper.
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

    /// Returns true if the slot at `id` currently holds a live object.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        matches!(self.entries.get(id.index()), Some(Some(_)))
    }

    /// Takes a snapshot of heap occupancy for leak checking.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(entry.data.type_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }
}
