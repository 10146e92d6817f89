//! Pointer-width tagged integer: the unboxed representation of Python `int`.
//!
//! A tagged value is one machine word. The low bit discriminates:
//!
//! * low bit 0 — a *short* integer, stored shifted left by one. The value
//!   range is `[isize::MIN >> 1, isize::MAX >> 1]`; sign-extending
//!   arithmetic right shift recovers it.
//! * low bit 1 — a *long* reference: the arena id of a boxed
//!   arbitrary-precision integer, shifted left with the tag bit set. A long
//!   tagged value owns one reference to the boxed object.
//!
//! The all-ones word is the tag-only [`TaggedInt::ERROR`] sentinel: it is
//! never a legal arithmetic result, and any operation that can return it
//! must be paired with a pending-error check by the caller.
//!
//! Arithmetic matches Python's `int` exactly: unbounded range via promotion
//! to the boxed form on overflow, floor division, and Euclidean remainder.
//! The short path performs no heap traffic at all.
//!
//! Portability note: the low-bit trick needs arena ids to fit in a word
//! minus one bit, which holds on every supported target; there is no
//! two-word fallback here.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
};

/// One machine word carrying either a short integer or a boxed-int reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedInt(usize);

/// Number of value bits available to a short integer.
const SHORT_BITS: u32 = usize::BITS - 1;

impl TaggedInt {
    /// The tag-only error sentinel. Returned by fallible tagged-int
    /// operations after the thread's error indicator has been set.
    pub const ERROR: Self = Self(usize::MAX);

    /// Largest value representable as a short.
    pub const MAX_SHORT: isize = isize::MAX >> 1;
    /// Smallest value representable as a short.
    pub const MIN_SHORT: isize = isize::MIN >> 1;

    /// The sentinel's raw word, the initial content of tagged-int attribute
    /// slots on instances.
    pub(crate) const ERROR_WORD: u64 = usize::MAX as u64;

    /// Reinterprets the raw word form stored in an instance attribute slot.
    #[inline]
    #[must_use]
    pub(crate) fn from_word(word: u64) -> Self {
        Self(word as usize)
    }

    /// The raw word form, for storage in an instance attribute slot.
    #[inline]
    #[must_use]
    pub(crate) fn to_word(self) -> u64 {
        self.0 as u64
    }

    /// Decodes a raw attribute word, returning the boxed-int id when the
    /// word holds a long reference.
    #[must_use]
    pub(crate) fn long_id_from_word(word: u64) -> Option<HeapId> {
        let tagged = Self(word as usize);
        tagged.is_long().then(|| tagged.heap_id())
    }

    /// Creates a short tagged integer. `n` must be within short range.
    #[inline]
    #[must_use]
    pub fn from_short(n: isize) -> Self {
        debug_assert!((Self::MIN_SHORT..=Self::MAX_SHORT).contains(&n));
        Self((n << 1) as usize)
    }

    /// True when the low bit is clear: a short integer.
    #[inline]
    #[must_use]
    pub fn is_short(self) -> bool {
        self.0 & 1 == 0
    }

    /// True when this is a long reference (tagged, but not the sentinel).
    #[inline]
    #[must_use]
    pub fn is_long(self) -> bool {
        self.0 & 1 == 1 && self != Self::ERROR
    }

    /// True when this is the error sentinel.
    #[inline]
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::ERROR
    }

    /// Recovers the short value by sign-extended right shift.
    #[inline]
    #[must_use]
    pub fn as_short(self) -> isize {
        debug_assert!(self.is_short());
        (self.0 as isize) >> 1
    }

    /// Returns the arena id of the boxed integer behind a long value.
    #[inline]
    #[must_use]
    pub fn heap_id(self) -> HeapId {
        debug_assert!(self.is_long());
        HeapId::from_index(self.0 >> 1)
    }

    fn from_heap_id(id: HeapId) -> Self {
        Self((id.index() << 1) | 1)
    }

    /// Converts a boxed integer without touching its reference count.
    ///
    /// If the value fits short range it is unboxed (the caller still owns
    /// the original reference). Otherwise the result borrows the caller's
    /// reference: the caller must keep the object alive and must not
    /// `decref` the tagged value.
    #[must_use]
    pub fn from_object_borrow(heap: &Heap, id: HeapId) -> Self {
        match short_value(heap, id) {
            Some(n) => Self::from_short(n),
            None => Self::from_heap_id(id),
        }
    }

    /// Converts a boxed integer, transferring the caller's reference.
    ///
    /// If the value fits short range, the reference is released and a short
    /// is returned; otherwise the long result owns the transferred
    /// reference.
    #[must_use]
    pub fn from_object_steal(heap: &mut Heap, id: HeapId) -> Self {
        match short_value(heap, id) {
            Some(n) => {
                heap.dec_ref(id);
                Self::from_short(n)
            }
            None => Self::from_heap_id(id),
        }
    }

    /// Converts a boxed integer, acquiring a fresh reference for the long
    /// case. The caller keeps their own reference.
    #[must_use]
    pub fn from_object_fresh(heap: &Heap, id: HeapId) -> Self {
        match short_value(heap, id) {
            Some(n) => Self::from_short(n),
            None => {
                heap.inc_ref(id);
                Self::from_heap_id(id)
            }
        }
    }

    /// Boxes this value, returning an owned reference.
    ///
    /// Shorts allocate a fresh boxed integer; longs return the existing
    /// object with an extra reference.
    #[must_use]
    pub fn as_object(self, heap: &mut Heap) -> HeapId {
        if self.is_short() {
            heap.allocate(HeapData::Int(BigInt::from(self.as_short())))
        } else {
            let id = self.heap_id();
            heap.inc_ref(id);
            id
        }
    }

    /// Reads the numeric value, boxed or not.
    #[must_use]
    pub fn to_bigint(self, heap: &Heap) -> BigInt {
        if self.is_short() {
            BigInt::from(self.as_short())
        } else if let HeapData::Int(n) = heap.get(self.heap_id()) {
            n.clone()
        } else {
            unreachable!("long tagged value does not reference an int")
        }
    }

    /// Creates a tagged integer from an arbitrary-precision value,
    /// demoting to short when it fits. The result owns its reference in the
    /// long case.
    #[must_use]
    pub fn from_bigint(heap: &mut Heap, n: BigInt) -> Self {
        match bigint_short(&n) {
            Some(v) => Self::from_short(v),
            None => Self::from_heap_id(heap.allocate(HeapData::Int(n))),
        }
    }

    /// Acquires an extra reference. No-op for shorts.
    pub fn incref(self, heap: &Heap) {
        if self.is_long() {
            heap.inc_ref(self.heap_id());
        }
    }

    /// Releases the owned reference. No-op for shorts.
    pub fn decref(self, heap: &mut Heap) {
        if self.is_long() {
            heap.dec_ref(self.heap_id());
        }
    }

    /// True when the value is negative.
    #[must_use]
    pub fn is_negative(self, heap: &Heap) -> bool {
        if self.is_short() {
            self.as_short() < 0
        } else if let HeapData::Int(n) = heap.get(self.heap_id()) {
            n.is_negative()
        } else {
            unreachable!("long tagged value does not reference an int")
        }
    }
}

/// Extracts the short value of a boxed int if it fits short range.
fn short_value(heap: &Heap, id: HeapId) -> Option<isize> {
    let HeapData::Int(n) = heap.get(id) else {
        unreachable!("tagged conversion on a non-int object");
    };
    bigint_short(n)
}

fn bigint_short(n: &BigInt) -> Option<isize> {
    n.to_i64()
        .and_then(|v| isize::try_from(v).ok())
        .filter(|v| (TaggedInt::MIN_SHORT..=TaggedInt::MAX_SHORT).contains(v))
}

/// `a + b`. Never fails; overflow promotes to the boxed path.
#[must_use]
pub fn tagged_add(heap: &mut Heap, a: TaggedInt, b: TaggedInt) -> TaggedInt {
    if a.is_short() && b.is_short() {
        // Carry-out XOR test on the shifted representations: the sum
        // overflowed iff its sign differs from both operands' signs.
        let sum = a.0.wrapping_add(b.0);
        if !(((sum ^ a.0) as isize) < 0 && ((sum ^ b.0) as isize) < 0) {
            return TaggedInt(sum);
        }
    }
    boxed_binary(heap, a, b, |x, y| x + y)
}

/// `a - b`. Never fails; overflow promotes to the boxed path.
#[must_use]
pub fn tagged_sub(heap: &mut Heap, a: TaggedInt, b: TaggedInt) -> TaggedInt {
    if a.is_short() && b.is_short() {
        // Borrow XOR test: overflow iff the difference's sign differs from
        // the minuend's and agrees with the subtrahend's.
        let diff = a.0.wrapping_sub(b.0);
        if !(((diff ^ a.0) as isize) < 0 && ((diff ^ b.0) as isize) >= 0) {
            return TaggedInt(diff);
        }
    }
    boxed_binary(heap, a, b, |x, y| x - y)
}

/// `a * b`. Never fails; overflow promotes to the boxed path.
#[must_use]
pub fn tagged_mul(heap: &mut Heap, a: TaggedInt, b: TaggedInt) -> TaggedInt {
    if a.is_short() && b.is_short() {
        // Conservative magnitude pre-check: with both magnitudes under half
        // the short bit budget the product of the shifted and unshifted
        // forms cannot overflow a word.
        let bound = 1_u128 << (SHORT_BITS / 2);
        let x = a.as_short();
        let y = b.as_short();
        if (x.unsigned_abs() as u128) < bound && (y.unsigned_abs() as u128) < bound {
            return TaggedInt(((a.0 as isize) * y) as usize);
        }
    }
    boxed_binary(heap, a, b, |x, y| x * y)
}

/// `-a`. Never fails; negating the most-negative short promotes.
#[must_use]
pub fn tagged_negate(heap: &mut Heap, a: TaggedInt) -> TaggedInt {
    if a.is_short() && a.0 as isize != isize::MIN {
        // Negating the shifted form negates the value.
        return TaggedInt(a.0.wrapping_neg());
    }
    let n = a.to_bigint(heap);
    TaggedInt::from_bigint(heap, -n)
}

/// `a // b` with Python floor semantics.
///
/// Division by zero raises `ZeroDivisionError`. Division by the short
/// representation of −1 takes the boxed path: the only short the native
/// divide cannot negate is `MIN_SHORT`, and the boxed operation handles it
/// uniformly.
pub fn tagged_floor_div(heap: &mut Heap, a: TaggedInt, b: TaggedInt) -> RunResult<TaggedInt> {
    if a.is_short() && b.is_short() {
        let x = a.as_short();
        let y = b.as_short();
        if y == 0 {
            return Err(ExcType::zero_division());
        }
        if y != -1 {
            // Native truncating divide, then pull the quotient one toward
            // negative infinity when the operands disagree in sign and the
            // division was inexact.
            let mut q = x / y;
            if (x ^ y) < 0 && x % y != 0 {
                q -= 1;
            }
            return Ok(TaggedInt::from_short(q));
        }
    }
    let divisor = b.to_bigint(heap);
    if divisor.is_zero() {
        return Err(ExcType::zero_division());
    }
    let dividend = a.to_bigint(heap);
    Ok(TaggedInt::from_bigint(heap, dividend.div_floor(&divisor)))
}

/// `a % b` with Python's non-negative-for-positive-divisor semantics.
///
/// Same zero and −1 policies as floor division.
pub fn tagged_remainder(heap: &mut Heap, a: TaggedInt, b: TaggedInt) -> RunResult<TaggedInt> {
    if a.is_short() && b.is_short() {
        let x = a.as_short();
        let y = b.as_short();
        if y == 0 {
            return Err(ExcType::zero_division());
        }
        if y != -1 {
            // Native remainder, then add the divisor back when the operands
            // disagree in sign and the remainder is nonzero.
            let mut r = x % y;
            if (x ^ y) < 0 && r != 0 {
                r += y;
            }
            return Ok(TaggedInt::from_short(r));
        }
    }
    let divisor = b.to_bigint(heap);
    if divisor.is_zero() {
        return Err(ExcType::zero_division());
    }
    let dividend = a.to_bigint(heap);
    Ok(TaggedInt::from_bigint(heap, dividend.mod_floor(&divisor)))
}

/// Tagged equality.
///
/// Short/short compares the shifted words directly. A short can never equal
/// a long: conversion canonicalizes every value that fits short range, so
/// longs are always outside it. Long/long defers to the boxed comparison.
#[must_use]
pub fn tagged_eq(heap: &Heap, a: TaggedInt, b: TaggedInt) -> bool {
    match (a.is_short(), b.is_short()) {
        (true, true) => a.0 == b.0,
        (true, false) | (false, true) => false,
        (false, false) => a.heap_id() == b.heap_id() || a.to_bigint(heap) == b.to_bigint(heap),
    }
}

/// Tagged ordering. Short/short compares the shifted words (shifting
/// preserves order); anything else boxes both sides.
#[must_use]
pub fn tagged_cmp(heap: &Heap, a: TaggedInt, b: TaggedInt) -> Ordering {
    if a.is_short() && b.is_short() {
        (a.0 as isize).cmp(&(b.0 as isize))
    } else {
        a.to_bigint(heap).cmp(&b.to_bigint(heap))
    }
}

/// Shared boxed fallback for the infallible binary operations.
fn boxed_binary(heap: &mut Heap, a: TaggedInt, b: TaggedInt, op: impl FnOnce(BigInt, BigInt) -> BigInt) -> TaggedInt {
    let x = a.to_bigint(heap);
    let y = b.to_bigint(heap);
    TaggedInt::from_bigint(heap, op(x, y))
}
