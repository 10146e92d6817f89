//! The runtime instance: heap, interned strings, vtable registry, thread
//! error state, and the process-wide singletons, initialized in one shot.
//!
//! Also home of the compiled-ABI boundary helpers: inside the runtime
//! errors travel as `RunResult`; compiled code expects a sentinel return
//! with the error parked on the thread state. [`Runtime::check`] and
//! [`Runtime::check_tagged`] perform that translation.

use crate::{
    bridge::{set_pending, ThreadState},
    exception::{ExcInstance, ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    tagged::TaggedInt,
    types::Tuple,
    value::Value,
    vtable::VTableRegistry,
};

/// Everything a loaded compiled module runs against.
#[derive(Debug)]
pub struct Runtime {
    /// The boxed-object arena.
    pub heap: Heap,
    /// The process-lifetime interned string table.
    pub interns: Interns,
    /// Registered per-class dispatch tables.
    pub vtables: VTableRegistry,
    pub(crate) thread: ThreadState,
    /// Stand-in for absent sys-exc-info slots.
    pub(crate) dummy_exc: HeapId,
    empty_tuple: HeapId,
}

impl Runtime {
    /// One-shot init: interns the fixed string table, allocates the dummy
    /// exception singleton and the shared empty tuple, and starts with a
    /// clean thread state.
    #[must_use]
    pub fn new() -> Self {
        let mut heap = Heap::default();
        let interns = Interns::new(&mut heap);
        let dummy_exc = heap.allocate(HeapData::Exception(ExcInstance::new(ExcType::BaseException, vec![])));
        let empty_tuple = heap.allocate(HeapData::Tuple(Tuple::default()));
        let thread = ThreadState::new(&heap, dummy_exc);
        Self {
            heap,
            interns,
            vtables: VTableRegistry::default(),
            thread,
            dummy_exc,
            empty_tuple,
        }
    }

    /// A fresh reference to the shared empty tuple.
    #[must_use]
    pub fn empty_tuple(&self) -> Value {
        self.heap.inc_ref(self.empty_tuple);
        Value::Ref(self.empty_tuple)
    }

    /// ABI boundary for object-producing operations: on error, parks it on
    /// the thread state and returns `None` (the null sentinel).
    pub fn check<T>(&mut self, result: RunResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                set_pending(self, err);
                None
            }
        }
    }

    /// ABI boundary for tagged-int operations: on error, parks it and
    /// returns the tag-only sentinel.
    pub fn check_tagged(&mut self, result: RunResult<TaggedInt>) -> TaggedInt {
        match result {
            Ok(value) => value,
            Err(err) => {
                set_pending(self, err);
                TaggedInt::ERROR
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::{clear_pending, error_pending},
        tagged::tagged_floor_div,
    };

    #[test]
    fn sentinel_boundary_parks_the_error() {
        let mut runtime = Runtime::new();
        let result = tagged_floor_div(&mut runtime.heap, TaggedInt::from_short(1), TaggedInt::from_short(0));
        let out = runtime.check_tagged(result);
        assert!(out.is_error());
        assert!(error_pending(&runtime));
        clear_pending(&mut runtime);
        assert!(!error_pending(&runtime));
    }

    #[test]
    fn empty_tuple_is_shared() {
        let mut runtime = Runtime::new();
        let a = runtime.empty_tuple();
        let b = runtime.empty_tuple();
        assert_eq!(a, b);
        a.drop_with_heap(&mut runtime.heap);
        b.drop_with_heap(&mut runtime.heap);
    }
}
