//! The versioned binary codec for the compiler's on-disk caches.
//!
//! Values are self-delimiting. Integers use a variable-length encoding
//! whose first byte discriminates by its lowest bits, biased so typical
//! small non-negative values fit in one byte:
//!
//! * low bit `0`: one byte, the high 7 bits store `value + 10`
//! * low bits `01`: two bytes little-endian, high 14 bits store `value + 100`
//! * low bits `011`: four bytes little-endian, high 29 bits store `value + 10000`
//! * the marker byte `0b0000_1111`: an arbitrary-precision integer follows
//!   as a `(byte length, sign)` header packed as one int, then the
//!   magnitude little-endian.
//!
//! Strings and bytes carry their length as an int before the raw bytes;
//! bools are one byte; floats are 8-byte IEEE-754 little-endian; tags are
//! one raw byte.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::ToPrimitive;

use crate::exception::{ExcType, RunError, RunResult};

/// Exact-match schema version of the encoding itself.
pub const CACHE_ABI_VERSION: u32 = 2;
/// Backward-compatible feature version; consumers require a minimum.
pub const CACHE_API_VERSION: u32 = 1;

const ONE_BYTE_BIAS: i64 = -10;
const ONE_BYTE_MAX: i64 = 117;
const TWO_BYTE_BIAS: i64 = -100;
const TWO_BYTE_MAX: i64 = 16283;
const FOUR_BYTE_BIAS: i64 = -10_000;
const FOUR_BYTE_MAX: i64 = 536_860_911;
/// First byte of an arbitrary-precision integer record.
const LONG_INT_MARKER: u8 = 0b0000_1111;
/// Upper bound on str/bytes/long-int payload lengths.
const MAX_PAYLOAD: u64 = 536_860_911;

/// The version pair published for consumers at module init.
///
/// A consumer verifies the capsule before trusting any cache bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecCapsule {
    /// Must match the consumer's expectation exactly.
    pub abi_version: u32,
    /// Must be at least the consumer's requirement.
    pub api_version: u32,
}

impl CodecCapsule {
    /// The capsule for this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            abi_version: CACHE_ABI_VERSION,
            api_version: CACHE_API_VERSION,
        }
    }

    /// Checks this capsule against a consumer's compiled-in expectations.
    pub fn verify(&self, expected_abi: u32, min_api: u32) -> RunResult<()> {
        if self.abi_version != expected_abi {
            return Err(ExcType::value_error(format!(
                "invalid cache ABI version: expected {expected_abi}, got {}",
                self.abi_version
            )));
        }
        if self.api_version < min_api {
            return Err(ExcType::value_error(format!(
                "cache API version {} is older than required {min_api}",
                self.api_version
            )));
        }
        Ok(())
    }
}

fn past_end() -> RunError {
    ExcType::value_error("reading past the buffer end")
}

/// Cursor over a borrowed encoded byte-string.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    /// Starts reading at the beginning of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left before the end.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> RunResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(past_end());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn peek(&self) -> RunResult<u8> {
        self.data.get(self.pos).copied().ok_or_else(past_end)
    }

    /// Reads a one-byte variant tag.
    pub fn read_tag(&mut self) -> RunResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a bool; anything but 0 or 1 is corruption.
    pub fn read_bool(&mut self) -> RunResult<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ExcType::value_error("invalid bool value")),
        }
    }

    /// Reads an 8-byte little-endian float.
    pub fn read_float(&mut self) -> RunResult<f64> {
        let bytes = self.take(8)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads an integer in the variable-length encoding.
    pub fn read_int(&mut self) -> RunResult<BigInt> {
        let first = self.peek()?;
        if first & 0b1 == 0 {
            let b = self.take(1)?[0];
            return Ok(BigInt::from(i64::from(b >> 1) + ONE_BYTE_BIAS));
        }
        if first & 0b11 == 0b01 {
            let bytes = self.take(2)?;
            let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
            return Ok(BigInt::from(i64::from(raw >> 2) + TWO_BYTE_BIAS));
        }
        if first & 0b111 == 0b011 {
            let bytes = self.take(4)?;
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            return Ok(BigInt::from(i64::from(raw >> 3) + FOUR_BYTE_BIAS));
        }
        if first != LONG_INT_MARKER {
            return Err(ExcType::value_error("invalid int value"));
        }
        self.pos += 1;
        let header = self.read_int()?;
        let Some(header) = header.to_u64() else {
            return Err(ExcType::value_error("invalid int value"));
        };
        let len = header >> 1;
        let negative = header & 1 == 1;
        if len > MAX_PAYLOAD {
            return Err(ExcType::value_error("invalid int value"));
        }
        let magnitude = BigUint::from_bytes_le(self.take(len as usize)?);
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Ok(BigInt::from_biguint(sign, magnitude))
    }

    /// Reads the length prefix of a str/bytes record, rejecting the
    /// long-int marker and out-of-range lengths with `kind`-specific
    /// wording.
    fn read_size(&mut self, kind: &str) -> RunResult<usize> {
        let invalid = || ExcType::value_error(format!("invalid {kind} size"));
        if self.peek()? == LONG_INT_MARKER {
            return Err(invalid());
        }
        let len = self.read_int()?;
        let len = len.to_u64().ok_or_else(invalid)?;
        if len > MAX_PAYLOAD {
            return Err(invalid());
        }
        Ok(len as usize)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> RunResult<String> {
        let len = self.read_size("str")?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ExcType::value_error("invalid str value"))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> RunResult<Vec<u8>> {
        let len = self.read_size("bytes")?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Growable output buffer for encoding.
///
/// Capacity starts at 256 bytes and doubles until a write fits, so an
/// extended writer produces the same byte sequence an unbounded one would.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: Vec<u8>,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    /// Creates a buffer at the initial capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push(&mut self, byte: u8) {
        self.reserve_for(1);
        self.buf.push(byte);
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.reserve_for(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    fn reserve_for(&mut self, extra: usize) {
        let needed = self.buf.len() + extra;
        let mut capacity = self.buf.capacity().max(256);
        while capacity < needed {
            capacity *= 2;
        }
        if capacity > self.buf.capacity() {
            self.buf.reserve_exact(capacity - self.buf.len());
        }
    }

    /// Copies out the written prefix.
    #[must_use]
    pub fn getvalue(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Writes a one-byte variant tag.
    pub fn write_tag(&mut self, tag: u8) {
        self.push(tag);
    }

    /// Writes a bool as one byte.
    pub fn write_bool(&mut self, b: bool) {
        self.push(u8::from(b));
    }

    /// Writes an 8-byte little-endian float.
    pub fn write_float(&mut self, f: f64) {
        self.extend(&f.to_le_bytes());
    }

    /// Writes an integer in the variable-length encoding.
    pub fn write_int(&mut self, n: &BigInt) {
        if let Some(v) = n.to_i64() {
            if (ONE_BYTE_BIAS..=ONE_BYTE_MAX).contains(&v) {
                self.push((((v - ONE_BYTE_BIAS) as u8) << 1) & 0xFE);
                return;
            }
            if (TWO_BYTE_BIAS..=TWO_BYTE_MAX).contains(&v) {
                let raw = (((v - TWO_BYTE_BIAS) as u16) << 2) | 0b01;
                self.extend(&raw.to_le_bytes());
                return;
            }
            if (FOUR_BYTE_BIAS..=FOUR_BYTE_MAX).contains(&v) {
                let raw = (((v - FOUR_BYTE_BIAS) as u32) << 3) | 0b011;
                self.extend(&raw.to_le_bytes());
                return;
            }
        }
        self.push(LONG_INT_MARKER);
        let magnitude = n.magnitude().to_bytes_le();
        let sign_bit = u64::from(n.sign() == Sign::Minus);
        let header = ((magnitude.len() as u64) << 1) | sign_bit;
        self.write_int(&BigInt::from(header));
        self.extend(&magnitude);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) {
        self.write_int(&BigInt::from(s.len()));
        self.extend(s.as_bytes());
    }

    /// Writes a length-prefixed byte string.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.write_int(&BigInt::from(b.len()));
        self.extend(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_int(v: i64) -> Vec<u8> {
        let mut w = WriteBuffer::new();
        w.write_int(&BigInt::from(v));
        w.getvalue()
    }

    #[test]
    fn int_width_boundaries() {
        // The width is decided by the biased range, not the magnitude
        for (value, width) in [
            (-10_i64, 1_usize),
            (0, 1),
            (117, 1),
            (118, 2),
            (-11, 2),
            (-100, 2),
            (16283, 2),
            (16284, 4),
            (-101, 4),
            (-10_000, 4),
            (536_860_911, 4),
        ] {
            assert_eq!(encoded_int(value).len(), width, "width of {value}");
        }
        // Past the biased four-byte range, the long form takes over
        assert_eq!(encoded_int(536_860_912)[0], LONG_INT_MARKER);
        assert_eq!(encoded_int(-10_001)[0], LONG_INT_MARKER);
    }

    #[test]
    fn int_round_trip() {
        let cases = [
            BigInt::from(0),
            BigInt::from(-10),
            BigInt::from(117),
            BigInt::from(-10_000),
            BigInt::from(536_860_911),
            BigInt::from(i64::MAX),
            BigInt::from(i64::MIN),
            BigInt::from(10).pow(40),
            -BigInt::from(10).pow(40),
        ];
        for n in &cases {
            let mut w = WriteBuffer::new();
            w.write_int(n);
            let bytes = w.getvalue();
            let mut r = ReadBuffer::new(&bytes);
            assert_eq!(&r.read_int().unwrap(), n);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn mixed_sequence_round_trip() {
        let mut w = WriteBuffer::new();
        w.write_tag(7);
        w.write_bool(true);
        w.write_int(&BigInt::from(-10_000));
        w.write_int(&BigInt::from(10).pow(40));
        w.write_str("hello");
        w.write_float(3.25);
        let bytes = w.getvalue();

        let mut r = ReadBuffer::new(&bytes);
        assert_eq!(r.read_tag().unwrap(), 7);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_int().unwrap(), BigInt::from(-10_000));
        assert_eq!(r.read_int().unwrap(), BigInt::from(10).pow(40));
        assert_eq!(r.read_str().unwrap(), "hello");
        assert_eq!(r.read_float().unwrap(), 3.25);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncation_reads_past_the_end() {
        let mut w = WriteBuffer::new();
        w.write_str("hello");
        let bytes = w.getvalue();
        let mut r = ReadBuffer::new(&bytes[..bytes.len() - 1]);
        let err = r.read_str().unwrap_err();
        let crate::exception::RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.message(), Some("reading past the buffer end"));
    }

    #[test]
    fn marker_in_size_position_is_rejected() {
        let mut w = WriteBuffer::new();
        w.write_str("hello");
        let mut bytes = w.getvalue();
        bytes[0] = 0b0000_1111;
        let mut r = ReadBuffer::new(&bytes);
        let err = r.read_str().unwrap_err();
        let crate::exception::RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.message(), Some("invalid str size"));

        let mut w = WriteBuffer::new();
        w.write_bytes(b"abc");
        let mut bytes = w.getvalue();
        bytes[0] = 0b0000_1111;
        let mut r = ReadBuffer::new(&bytes);
        let err = r.read_bytes().unwrap_err();
        let crate::exception::RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.message(), Some("invalid bytes size"));
    }

    #[test]
    fn corrupt_bool_is_rejected() {
        let mut r = ReadBuffer::new(&[2]);
        assert!(r.read_bool().is_err());
    }

    #[test]
    fn growth_preserves_the_byte_sequence() {
        // Write well past the initial capacity and compare against a
        // straightforward concatenation
        let mut w = WriteBuffer::new();
        let mut expected = Vec::new();
        for i in 0..200 {
            w.write_str("twelve bytes");
            let mut one = WriteBuffer::new();
            one.write_str("twelve bytes");
            expected.extend(one.getvalue());
            assert_eq!(w.len(), expected.len(), "after record {i}");
        }
        assert_eq!(w.getvalue(), expected);
    }

    #[test]
    fn capsule_verification() {
        let capsule = CodecCapsule::current();
        capsule.verify(CACHE_ABI_VERSION, CACHE_API_VERSION).unwrap();
        assert!(capsule.verify(CACHE_ABI_VERSION + 1, 0).is_err());
        assert!(capsule.verify(CACHE_ABI_VERSION, CACHE_API_VERSION + 1).is_err());

        let old = CodecCapsule {
            abi_version: CACHE_ABI_VERSION,
            api_version: 0,
        };
        let err = old.verify(CACHE_ABI_VERSION, 1).unwrap_err();
        let crate::exception::RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.message(), Some("cache API version 0 is older than required 1"));
    }
}
