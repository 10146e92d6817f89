//! Host list wrapper and the bounds-checked indexing primitives compiled
//! code calls instead of the generic sequence protocol.

use super::normalize_index;
use crate::{
    exception::RunResult,
    heap::{ChildIds, Heap, HeapData, HeapId},
    tagged::TaggedInt,
    value::Value,
};

/// Mutable sequence of values. Owns one reference per stored `Ref`.
#[derive(Debug, Default)]
pub struct List(Vec<Value>);

impl List {
    /// Creates a list taking ownership of the given values' references.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the list holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read-only view of the items.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Appends a value, taking ownership of its reference.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        for item in &self.0 {
            if let Value::Ref(id) = item {
                out.push(*id);
            }
        }
    }
}

/// `list[index]` with a tagged index.
///
/// Returns a fresh reference to the item. Negative indices fold modulo the
/// length; out-of-range raises `IndexError: list index out of range`; a long
/// index raises the ssize_t `OverflowError`.
pub fn list_get_item(heap: &mut Heap, list: HeapId, index: TaggedInt) -> RunResult<Value> {
    let HeapData::List(items) = heap.get(list) else {
        unreachable!("list_get_item: not a list");
    };
    let pos = normalize_index(heap, index, items.len(), "list index out of range")?;
    let HeapData::List(items) = heap.get(list) else {
        unreachable!();
    };
    Ok(items.0[pos].clone_ref(heap))
}

/// `list[index] = value` with a tagged index, steal-ref semantics.
///
/// Takes ownership of `value`'s reference and releases the reference the
/// slot previously held, in that order, matching the host's set-item-steal
/// primitive. On error the stolen reference is released before returning.
pub fn list_set_item(heap: &mut Heap, list: HeapId, index: TaggedInt, value: Value) -> RunResult<()> {
    let HeapData::List(items) = heap.get(list) else {
        unreachable!("list_set_item: not a list");
    };
    let pos = match normalize_index(heap, index, items.len(), "list index out of range") {
        Ok(pos) => pos,
        Err(err) => {
            value.drop_with_heap(heap);
            return Err(err);
        }
    };
    let HeapData::List(items) = heap.get_mut(list) else {
        unreachable!();
    };
    let old = std::mem::replace(&mut items.0[pos], value);
    old.drop_with_heap(heap);
    Ok(())
}
