//! Host str wrapper with three-kind codepoint accounting, plus the string
//! primitives compiled code calls: indexing, slicing, find, prefix/suffix
//! tests, one-pass concatenation, strip, and replace.
//!
//! The host stores text in one of three kinds (1, 2, or 4 bytes per
//! codepoint, chosen by the widest codepoint present). Storage here is
//! UTF-8, but the kind and the codepoint length are tracked and honored at
//! the API boundary: indexing is by codepoint, and every constructor picks
//! the narrowest kind that fits.

use super::{clamp_slice_bound, normalize_index};
use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    tagged::TaggedInt,
    value::Value,
};

/// Bytes per codepoint in the host's string representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrKind {
    /// Codepoints below U+0100.
    OneByte,
    /// Codepoints below U+10000.
    TwoByte,
    /// The full range.
    FourByte,
}

impl StrKind {
    /// The narrowest kind able to hold one codepoint.
    #[must_use]
    pub fn of_char(c: char) -> Self {
        match u32::from(c) {
            0..=0xFF => Self::OneByte,
            0x100..=0xFFFF => Self::TwoByte,
            _ => Self::FourByte,
        }
    }

    /// Bytes per codepoint for this kind.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::OneByte => 1,
            Self::TwoByte => 2,
            Self::FourByte => 4,
        }
    }
}

/// Unicode string with cached kind and codepoint length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Str {
    data: String,
    kind: StrKind,
    char_len: usize,
}

impl Str {
    /// Wraps a string, scanning once for kind and codepoint length.
    #[must_use]
    pub fn new(data: String) -> Self {
        let mut kind = StrKind::OneByte;
        let mut char_len = 0;
        for c in data.chars() {
            kind = kind.max(StrKind::of_char(c));
            char_len += 1;
        }
        Self { data, kind, char_len }
    }

    /// Wraps a string whose kind and length the caller already knows.
    /// Used by the one-pass builder to avoid a rescan.
    fn with_metrics(data: String, kind: StrKind, char_len: usize) -> Self {
        debug_assert_eq!(Self::new(data.clone()).kind, kind);
        debug_assert_eq!(data.chars().count(), char_len);
        Self { data, kind, char_len }
    }

    /// The UTF-8 content.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// The storage kind.
    #[must_use]
    pub fn kind(&self) -> StrKind {
        self.kind
    }

    /// Length in codepoints, matching Python's `len`.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.char_len
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self::new(s.to_owned())
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Which ends `str.strip` trims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripMode {
    /// `lstrip`
    Left,
    /// `rstrip`
    Right,
    /// `strip`
    Both,
}

fn expect_str(heap: &Heap, id: HeapId) -> &Str {
    let HeapData::Str(s) = heap.get(id) else {
        unreachable!("expected a str object");
    };
    s
}

/// `s[i]` with a tagged index: a fresh single-codepoint string of the
/// narrowest kind able to hold that codepoint.
pub fn str_char_at(heap: &mut Heap, s: HeapId, index: TaggedInt) -> RunResult<Value> {
    let text = expect_str(heap, s);
    let pos = normalize_index(heap, index, text.char_len(), "string index out of range")?;
    let text = expect_str(heap, s);
    let c = text.as_str().chars().nth(pos).expect("index validated above");
    let single = Str::with_metrics(c.to_string(), StrKind::of_char(c), 1);
    Ok(Value::Ref(heap.allocate(HeapData::Str(single))))
}

/// `s[begin:end]` with tagged bounds, host string semantics: negative
/// bounds adjust by the length and then clamp at zero; bounds past the end
/// clamp at the end.
pub fn str_slice(heap: &mut Heap, s: HeapId, begin: TaggedInt, end: TaggedInt) -> RunResult<Value> {
    let text = expect_str(heap, s);
    let len = text.char_len();
    let begin = clamp_slice_bound(heap, begin, len);
    let end = clamp_slice_bound(heap, end, len);
    let text = expect_str(heap, s);
    let piece: String = if begin >= end {
        String::new()
    } else {
        text.as_str().chars().skip(begin).take(end - begin).collect()
    };
    Ok(Value::Ref(heap.allocate(HeapData::Str(Str::new(piece)))))
}

/// `s.find(sub[, start[, end]])`, returning the tagged codepoint position
/// of the first occurrence or tagged −1.
pub fn str_find(
    heap: &Heap,
    s: HeapId,
    sub: HeapId,
    start: Option<TaggedInt>,
    end: Option<TaggedInt>,
) -> RunResult<TaggedInt> {
    let text = expect_str(heap, s);
    let needle = expect_str(heap, sub);
    let len = text.char_len();
    let lo = start.map_or(0, |b| clamp_slice_bound(heap, b, len));
    let hi = end.map_or(len, |b| clamp_slice_bound(heap, b, len));
    if lo > hi {
        return Ok(TaggedInt::from_short(-1));
    }
    let window: String = text.as_str().chars().skip(lo).take(hi - lo).collect();
    match window.find(needle.as_str()) {
        Some(byte_pos) => {
            // Convert the byte offset back to a codepoint offset
            let chars_before = window[..byte_pos].chars().count();
            Ok(TaggedInt::from_short((lo + chars_before) as isize))
        }
        None => Ok(TaggedInt::from_short(-1)),
    }
}

/// `s.startswith(prefix)` where `prefix` is a str or a tuple of str.
pub fn str_startswith(heap: &Heap, s: HeapId, candidates: &Value) -> RunResult<bool> {
    prefix_suffix_match(heap, s, candidates, "startswith", |text, c| text.starts_with(c))
}

/// `s.endswith(suffix)` where `suffix` is a str or a tuple of str.
pub fn str_endswith(heap: &Heap, s: HeapId, candidates: &Value) -> RunResult<bool> {
    prefix_suffix_match(heap, s, candidates, "endswith", |text, c| text.ends_with(c))
}

fn prefix_suffix_match(
    heap: &Heap,
    s: HeapId,
    candidates: &Value,
    method: &str,
    test: impl Fn(&str, &str) -> bool,
) -> RunResult<bool> {
    let text = expect_str(heap, s).as_str();
    match candidates {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(candidate) => Ok(test(text, candidate.as_str())),
            HeapData::Tuple(tuple) => {
                for item in tuple.as_slice() {
                    let Some(candidate) = item.as_str(heap) else {
                        return Err(ExcType::type_error(format!(
                            "tuple for {method} must only contain str, not {}",
                            item.type_name(heap)
                        )));
                    };
                    if test(text, candidate) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(ExcType::type_error(format!(
                "{method} first arg must be str or a tuple of str, not {}",
                other.type_name()
            ))),
        },
        other => Err(ExcType::type_error(format!(
            "{method} first arg must be str or a tuple of str, not {}",
            other.type_name(heap)
        ))),
    }
}

/// Concatenates a sequence of strings in one pass.
///
/// The first walk computes the total length and the widest kind; the copy
/// then happens into storage sized up front. Inputs sharing a kind take the
/// bulk-copy path; mixed kinds go codepoint-by-codepoint through the
/// width-aware writer (one and the same under UTF-8 storage, but the
/// metrics are carried so the result never rescans).
pub fn str_build(heap: &mut Heap, parts: &[Value]) -> RunResult<Value> {
    let mut total_bytes = 0;
    let mut char_len = 0;
    let mut kind = StrKind::OneByte;
    for part in parts {
        let Value::Ref(id) = part else {
            return Err(ExcType::type_error(format!(
                "can only concatenate str (not \"{}\") to str",
                part.type_name(heap)
            )));
        };
        let HeapData::Str(s) = heap.get(*id) else {
            return Err(ExcType::type_error(format!(
                "can only concatenate str (not \"{}\") to str",
                heap.get(*id).type_name()
            )));
        };
        total_bytes += s.as_str().len();
        char_len += s.char_len();
        kind = kind.max(s.kind());
    }

    let mut out = String::with_capacity(total_bytes);
    for part in parts {
        let Value::Ref(id) = part else { unreachable!() };
        let HeapData::Str(s) = heap.get(*id) else { unreachable!() };
        out.push_str(s.as_str());
    }
    Ok(Value::Ref(heap.allocate(HeapData::Str(Str::with_metrics(out, kind, char_len)))))
}

/// Builds the 64-bit Bloom mask of a separator set's codepoints.
fn bloom_mask(chars: &str) -> u64 {
    chars.chars().fold(0, |mask, c| mask | (1_u64 << (u32::from(c) & 63)))
}

/// Python's notion of whitespace for `str.strip()` with no argument.
///
/// Beyond Unicode `White_Space`, the host also strips the C0 separator
/// block 0x1C–0x1F.
fn py_isspace(c: char) -> bool {
    matches!(c, '\x1c'..='\x1f') || c.is_whitespace()
}

/// `s.strip()` / `lstrip` / `rstrip`, with an optional separator set.
///
/// With a separator set, candidate codepoints are screened through a
/// Bloom mask of the set and confirmed with a full search only on mask
/// hits. With no set, ASCII whitespace is table-tested on the one-byte
/// fast path before falling back to the full classifier.
pub fn str_strip(heap: &mut Heap, s: HeapId, chars: Option<HeapId>, mode: StripMode) -> RunResult<Value> {
    let text = expect_str(heap, s);
    let stripped: &str = match chars {
        Some(set_id) => {
            let set = expect_str(heap, set_id).as_str();
            let mask = bloom_mask(set);
            let in_set = |c: char| mask & (1_u64 << (u32::from(c) & 63)) != 0 && set.contains(c);
            trim(text.as_str(), mode, in_set)
        }
        None => {
            if text.kind() == StrKind::OneByte {
                // One-byte strings cannot contain non-ASCII whitespace that
                // the ASCII table misses, except 0x85 and 0xA0.
                trim(text.as_str(), mode, |c| {
                    c.is_ascii_whitespace() || matches!(c, '\x1c'..='\x1f' | '\u{85}' | '\u{a0}')
                })
            } else {
                trim(text.as_str(), mode, py_isspace)
            }
        }
    };
    let stripped = stripped.to_owned();
    Ok(Value::Ref(heap.allocate(HeapData::Str(Str::new(stripped)))))
}

fn trim(text: &str, mode: StripMode, pred: impl Fn(char) -> bool + Copy) -> &str {
    match mode {
        StripMode::Left => text.trim_start_matches(pred),
        StripMode::Right => text.trim_end_matches(pred),
        StripMode::Both => text.trim_matches(pred),
    }
}

/// `s.replace(old, new[, count])`. A negative count replaces every
/// occurrence, matching the host.
pub fn str_replace(heap: &mut Heap, s: HeapId, old: HeapId, new: HeapId, count: isize) -> RunResult<Value> {
    let text = expect_str(heap, s).as_str();
    let old_s = expect_str(heap, old).as_str();
    let new_s = expect_str(heap, new).as_str();
    let replaced = if count < 0 {
        text.replace(old_s, new_s)
    } else {
        text.replacen(old_s, new_s, count as usize)
    };
    Ok(Value::Ref(heap.allocate(HeapData::Str(Str::new(replaced)))))
}
