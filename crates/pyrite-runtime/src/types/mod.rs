//! Host container and type-object wrappers with the exact boundary
//! semantics compiled code relies on: tagged-index normalization, precise
//! exception wording, and steal/borrow reference discipline.

pub mod bytes;
pub mod class;
pub mod dict;
pub mod list;
pub mod str;
pub mod tuple;

pub use bytes::Bytes;
pub use class::{Instance, Metaclass, TypeObject};
pub use dict::Dict;
pub use list::List;
pub use str::{Str, StrKind};
pub use tuple::Tuple;

use crate::{
    exception::{ExcType, RunResult},
    heap::Heap,
    tagged::TaggedInt,
};

/// Converts a tagged index into a position within a sequence of `len` items.
///
/// Short indices fold negative values modulo the length and bounds-check,
/// raising `IndexError` with the given message (each container carries the
/// host's exact wording; bytes drop the container name). A long index can
/// never be in range for an in-memory sequence; it raises the host's
/// `OverflowError` for oversized ssize_t conversions.
pub(crate) fn normalize_index(heap: &Heap, index: TaggedInt, len: usize, message: &str) -> RunResult<usize> {
    if !index.is_short() {
        // Canonical long values are outside short range, hence out of any
        // sequence's bounds; CPython surfaces this as the ssize_t overflow.
        let _ = heap;
        return Err(ExcType::overflow_ssize());
    }
    let mut i = index.as_short();
    if i < 0 {
        i += len as isize;
    }
    if i < 0 || i as usize >= len {
        return Err(ExcType::index_error(message));
    }
    Ok(i as usize)
}

/// Converts a tagged slice bound into a clamped offset, string-style.
///
/// Mirrors the host's string slicing: negative bounds are adjusted by the
/// length and then clamped to zero; bounds past the end clamp to the end.
/// Long bounds clamp to whichever end their sign indicates.
pub(crate) fn clamp_slice_bound(heap: &Heap, bound: TaggedInt, len: usize) -> usize {
    if !bound.is_short() {
        // A canonical long is out of short range; its sign decides the end.
        return if bound.is_negative(heap) { 0 } else { len };
    }
    let i = bound.as_short();
    let adjusted = if i < 0 { i + len as isize } else { i };
    adjusted.clamp(0, len as isize) as usize
}
