//! The immediate value type flowing between runtime operations.
//!
//! Small values (`None`, `bool`, `float`, builtin exception classes) are
//! stored inline; everything else lives on the [`Heap`] and is referenced
//! via `Ref(HeapId)`. Integers are always boxed on the host side — the
//! unboxed form is [`crate::tagged::TaggedInt`], which only compiled code
//! holds.
//!
//! `Clone` is intentionally not derived: a `Ref` clone must go through
//! [`Value::clone_ref`] so the reference count follows, and dropping a `Ref`
//! must go through [`Value::drop_with_heap`].

use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{
    exception::ExcType,
    heap::{Heap, HeapData, HeapId},
    py_hash::{hash_bigint, hash_bytes, hash_f64, hash_str},
};

/// A host value: either an immediate or a heap reference.
#[derive(Debug, PartialEq)]
pub enum Value {
    /// Python's `None`.
    None,
    /// Python `bool`.
    Bool(bool),
    /// Python `float`; every bit pattern is a legal value.
    Float(f64),
    /// A builtin exception class, stored inline the way the host exposes
    /// statically-allocated exception types.
    ExcType(ExcType),
    /// Reference to a boxed object. Carries one reference count.
    Ref(HeapId),
}

impl Value {
    /// Clones this value, incrementing the refcount for heap references.
    #[must_use]
    pub fn clone_ref(&self, heap: &Heap) -> Self {
        match self {
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Float(f) => Self::Float(*f),
            Self::ExcType(t) => Self::ExcType(*t),
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
        }
    }

    /// Releases the reference this value owns, if any.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Returns the Python-visible type name.
    #[must_use]
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Float(_) => "float",
            Self::ExcType(_) => "type",
            Self::Ref(id) => heap.get(*id).type_name(),
        }
    }

    /// Returns the boxed integer behind this value, if it is an int.
    #[must_use]
    pub fn as_int<'a>(&self, heap: &'a Heap) -> Option<&'a BigInt> {
        if let Self::Ref(id) = self
            && let HeapData::Int(n) = heap.get(*id)
        {
            return Some(n);
        }
        None
    }

    /// Returns the str content behind this value, if it is a str.
    #[must_use]
    pub fn as_str<'a>(&self, heap: &'a Heap) -> Option<&'a str> {
        if let Self::Ref(id) = self
            && let HeapData::Str(s) = heap.get(*id)
        {
            return Some(s.as_str());
        }
        None
    }

    /// Python equality. Numeric values compare across representations
    /// (`1 == 1.0 == True`); containers compare element-wise.
    #[must_use]
    pub fn py_eq(&self, other: &Self, heap: &Heap) -> bool {
        if let (Self::Ref(a), Self::Ref(b)) = (self, other)
            && a == b
        {
            return true;
        }
        if let (Some(a), Some(b)) = (numeric_scalar(self, heap), numeric_scalar(other, heap)) {
            return a.eq_scalar(&b);
        }
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => match (heap.get(*a), heap.get(*b)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1.as_str() == s2.as_str(),
                (HeapData::Bytes(b1), HeapData::Bytes(b2)) => b1.as_slice() == b2.as_slice(),
                (HeapData::Tuple(t1), HeapData::Tuple(t2)) => {
                    t1.len() == t2.len()
                        && t1
                            .as_slice()
                            .iter()
                            .zip(t2.as_slice())
                            .all(|(x, y)| x.py_eq(y, heap))
                }
                (HeapData::List(l1), HeapData::List(l2)) => {
                    l1.len() == l2.len()
                        && l1
                            .as_slice()
                            .iter()
                            .zip(l2.as_slice())
                            .all(|(x, y)| x.py_eq(y, heap))
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Python hash for use as a dict key.
    ///
    /// Returns `None` for unhashable types (list, dict).
    #[must_use]
    pub fn py_hash(&self, heap: &Heap) -> Option<u64> {
        match self {
            Self::None => Some(0x2af8_17a1),
            Self::Bool(b) => Some(crate::py_hash::hash_i64(i64::from(*b))),
            Self::Float(f) => Some(hash_f64(*f)),
            Self::ExcType(t) => Some(hash_str(t.into())),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Int(n) => Some(hash_bigint(n)),
                HeapData::Str(s) => Some(hash_str(s.as_str())),
                HeapData::Bytes(b) => Some(hash_bytes(b.as_slice())),
                HeapData::Tuple(t) => {
                    // Mix element hashes; unhashable element poisons the tuple
                    let mut acc: u64 = 0x345678;
                    for item in t.as_slice() {
                        let h = item.py_hash(heap)?;
                        acc = acc.rotate_left(13) ^ h;
                    }
                    Some(acc)
                }
                // Types, functions, instances hash by identity
                HeapData::Type(_)
                | HeapData::Function(_)
                | HeapData::BoundMethod(_)
                | HeapData::Instance(_)
                | HeapData::Exception(_) => Some(id.index() as u64 ^ 0x9e37_79b9),
                _ => None,
            },
        }
    }
}

/// A numeric value lifted out of its representation for cross-type equality.
enum NumericScalar<'a> {
    Int(&'a BigInt),
    Small(i64),
    Float(f64),
}

impl NumericScalar<'_> {
    fn eq_scalar(&self, other: &Self) -> bool {
        use NumericScalar::{Float, Int, Small};
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Small(a), Small(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Small(b)) | (Small(b), Int(a)) => **a == BigInt::from(*b),
            // Exact comparison: rounding the int to f64 would equate
            // neighbors like 10**30 and 1e30
            (Int(a), Float(b)) | (Float(b), Int(a)) => {
                b.fract() == 0.0 && BigInt::from_f64(*b).is_some_and(|exact| **a == exact)
            }
            (Small(a), Float(b)) | (Float(b), Small(a)) => (*a as f64) == *b,
        }
    }
}

/// Extracts a numeric view of a value, if it is numeric.
fn numeric_scalar<'a>(value: &Value, heap: &'a Heap) -> Option<NumericScalar<'a>> {
    match value {
        Value::Bool(b) => Some(NumericScalar::Small(i64::from(*b))),
        Value::Float(f) => Some(NumericScalar::Float(*f)),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Int(n) => Some(NumericScalar::Int(n)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_across_representations() {
        let mut heap = Heap::default();
        let one = Value::Ref(heap.allocate(HeapData::Int(BigInt::from(1))));
        assert!(one.py_eq(&Value::Bool(true), &heap));
        assert!(one.py_eq(&Value::Float(1.0), &heap));
        assert!(!one.py_eq(&Value::Float(1.5), &heap));
        one.drop_with_heap(&mut heap);
    }

    #[test]
    fn equal_numbers_hash_alike() {
        let mut heap = Heap::default();
        let one = Value::Ref(heap.allocate(HeapData::Int(BigInt::from(1))));
        assert_eq!(one.py_hash(&heap), Value::Bool(true).py_hash(&heap));
        assert_eq!(one.py_hash(&heap), Value::Float(1.0).py_hash(&heap));
        one.drop_with_heap(&mut heap);
    }

    #[test]
    fn int_float_equality_is_exact_beyond_f64_precision() {
        let mut heap = Heap::default();
        // 1e30's exact value is 1000000000000000019884624838656, not 10**30
        let ten_pow_30 = Value::Ref(heap.allocate(HeapData::Int(BigInt::from(10).pow(30))));
        assert!(!ten_pow_30.py_eq(&Value::Float(1e30), &heap));

        let exact = Value::Ref(heap.allocate(HeapData::Int(BigInt::from_f64(1e30).unwrap())));
        assert!(exact.py_eq(&Value::Float(1e30), &heap));
        assert_eq!(exact.py_hash(&heap), Value::Float(1e30).py_hash(&heap));

        ten_pow_30.drop_with_heap(&mut heap);
        exact.drop_with_heap(&mut heap);
    }

    #[test]
    fn clone_ref_bumps_refcount() {
        let mut heap = Heap::default();
        let v = Value::Ref(heap.allocate(HeapData::Str("abc".into())));
        let w = v.clone_ref(&heap);
        if let Value::Ref(id) = v {
            assert_eq!(heap.refcount(id), 2);
        }
        v.drop_with_heap(&mut heap);
        w.drop_with_heap(&mut heap);
    }
}
