//! Host tuple wrapper and its indexing primitive.

use super::normalize_index;
use crate::{
    exception::RunResult,
    heap::{ChildIds, Heap, HeapData, HeapId},
    tagged::TaggedInt,
    value::Value,
};

/// Immutable sequence of values. Owns one reference per stored `Ref`.
#[derive(Debug, Default)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    /// Creates a tuple taking ownership of the given values' references.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the tuple holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read-only view of the items.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
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

/// `tuple[index]` with a tagged index.
///
/// Same normalization and error policy as list indexing, with tuple wording.
pub fn tuple_get_item(heap: &mut Heap, tuple: HeapId, index: TaggedInt) -> RunResult<Value> {
    let HeapData::Tuple(items) = heap.get(tuple) else {
        unreachable!("tuple_get_item: not a tuple");
    };
    let pos = normalize_index(heap, index, items.len(), "tuple index out of range")?;
    let HeapData::Tuple(items) = heap.get(tuple) else {
        unreachable!();
    };
    Ok(items.0[pos].clone_ref(heap))
}
