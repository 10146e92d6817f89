//! Hash helpers honoring Python's cross-type hash invariant.
//!
//! Python guarantees `a == b` implies `hash(a) == hash(b)`, and
//! `0 == 0.0 == False`, so integers, floats, and bools must hash alike on
//! equal values. Numeric hashing therefore reduces modulo the Mersenne prime
//! `2^61 - 1` the way CPython's `long_hash` does. Strings and bytes hash
//! with a fixed-seed `ahash`; dict ordering here is insertion order, so
//! CPython's SipHash is not required.

use ahash::RandomState;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

/// Mersenne prime used by CPython for numeric hashing: `2^61 - 1`.
const MODULUS: u64 = (1 << 61) - 1;

/// Fixed-seed hasher state for strings and bytes, so hashes are stable
/// within a process run.
fn byte_hasher() -> RandomState {
    RandomState::with_seeds(0x9e37_79b9, 0x85eb_ca6b, 0xc2b2_ae35, 0x27d4_eb2f)
}

/// Hashes a signed 64-bit integer using the modular algorithm.
///
/// Sign-preserving `n % (2^61 - 1)`, with a result of `-1` remapped to `-2`
/// (the host reserves `-1` as an error sentinel in hash slots).
#[must_use]
pub(crate) fn hash_i64(value: i64) -> u64 {
    if value == 0 {
        return 0;
    }
    let sign: i64 = if value < 0 { -1 } else { 1 };
    // i64::MIN's absolute value does not fit i64, go through u64
    let abs = value.unsigned_abs();
    let remainder = (abs % MODULUS) as i64;
    let result = sign * remainder;
    u64::from_ne_bytes(if result == -1 { -2_i64 } else { result }.to_ne_bytes())
}

/// Hashes an arbitrary-precision integer.
///
/// Agrees with [`hash_i64`] for values in i64 range, and applies the same
/// modular reduction outside it.
#[must_use]
pub(crate) fn hash_bigint(value: &BigInt) -> u64 {
    if let Some(i) = value.to_i64() {
        return hash_i64(i);
    }
    if value.is_zero() {
        return 0;
    }
    let remainder = (value.magnitude() % MODULUS).to_i64().unwrap_or(0);
    let result = if value.is_negative() { -remainder } else { remainder };
    u64::from_ne_bytes(if result == -1 { -2_i64 } else { result }.to_ne_bytes())
}

/// Hashes an `f64`.
///
/// Integral floats delegate to the integer reduction so
/// `hash(1.0) == hash(1)`, going through [`hash_bigint`] on the exact value
/// when it exceeds i64 range. Non-integral floats can never equal an
/// integer; their bit pattern is folded into the same modulus.
#[must_use]
pub(crate) fn hash_f64(value: f64) -> u64 {
    if value.is_nan() {
        return 0;
    }
    if value.is_infinite() {
        let result: i64 = if value > 0.0 { 314_159 } else { -314_159 };
        return u64::from_ne_bytes(result.to_ne_bytes());
    }
    let truncated = value.trunc();
    if value == truncated {
        if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
            return hash_i64(truncated as i64);
        }
        // Finite integral floats are exact integers
        if let Some(exact) = BigInt::from_f64(truncated) {
            return hash_bigint(&exact);
        }
    }
    value.to_bits() % MODULUS
}

/// Hashes string content with the fixed-seed byte hasher.
#[must_use]
pub(crate) fn hash_str(value: &str) -> u64 {
    byte_hasher().hash_one(value.as_bytes())
}

/// Hashes raw bytes with the fixed-seed byte hasher.
#[must_use]
pub(crate) fn hash_bytes(value: &[u8]) -> u64 {
    byte_hasher().hash_one(value)
}
