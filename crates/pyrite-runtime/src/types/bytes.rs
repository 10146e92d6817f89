//! Host bytes wrapper and its indexing and slicing primitives.

use super::{clamp_slice_bound, normalize_index};
use crate::{
    exception::RunResult,
    heap::{Heap, HeapData, HeapId},
    tagged::TaggedInt,
    value::Value,
};

/// Immutable byte string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    /// Wraps a byte buffer.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Number of bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read-only view of the content.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

/// `b[i]` with a tagged index, yielding the byte's value 0..=255 as a tagged
/// short int.
pub fn bytes_get_item(heap: &mut Heap, bytes: HeapId, index: TaggedInt) -> RunResult<TaggedInt> {
    let HeapData::Bytes(data) = heap.get(bytes) else {
        unreachable!("bytes_get_item: not bytes");
    };
    let pos = normalize_index(heap, index, data.len(), "index out of range")?;
    let HeapData::Bytes(data) = heap.get(bytes) else {
        unreachable!();
    };
    Ok(TaggedInt::from_short(isize::from(data.0[pos])))
}

/// `b[begin:end]` with tagged bounds, slice-clamp semantics.
pub fn bytes_slice(heap: &mut Heap, bytes: HeapId, begin: TaggedInt, end: TaggedInt) -> RunResult<Value> {
    let HeapData::Bytes(data) = heap.get(bytes) else {
        unreachable!("bytes_slice: not bytes");
    };
    let len = data.len();
    let begin = clamp_slice_bound(heap, begin, len);
    let end = clamp_slice_bound(heap, end, len);
    let HeapData::Bytes(data) = heap.get(bytes) else {
        unreachable!();
    };
    let piece = if begin >= end {
        Vec::new()
    } else {
        data.0[begin..end].to_vec()
    };
    Ok(Value::Ref(heap.allocate(HeapData::Bytes(Bytes(piece)))))
}
