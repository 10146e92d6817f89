//! Typed native attribute accessors.
//!
//! Each native attribute of a compiled class is described by an
//! [`AttrDescriptor`]: its storage offset, representation kind, flags, and
//! (for floats) the definedness-bitmap position. The accessors read and
//! write the raw instance words, track definedness, and raise the host's
//! exact `AttributeError`/`TypeError` wordings.

use bitflags::bitflags;

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    tagged::TaggedInt,
    types::class::{BOOL_UNDEFINED, REF_ID_BIAS, REF_NONE, REF_UNDEFINED},
    value::Value,
};

bitflags! {
    /// Behavior flags on a native attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        /// The attribute always holds a value; skip the definedness test.
        const ALWAYS_DEFINED = 1;
        /// `del obj.attr` is allowed.
        const DELETABLE = 1 << 1;
        /// `None` is a legal value for a reference attribute.
        const ALLOW_NONE = 1 << 2;
    }
}

/// Storage representation of a native attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// A boxed reference. `0` undefined, `1` None, otherwise `heap id + 2`.
    Ref,
    /// A tagged integer word; the tag-only sentinel means undefined.
    TaggedInt,
    /// A bool stored as `0`/`1`; `2` means undefined.
    Bool,
    /// IEEE-754 bits. Every pattern is legal, so definedness lives in the
    /// bitmap.
    Float,
}

/// The declared value type of a reference attribute, checked on set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    /// Any object; no check.
    Object,
    /// Exact `str`.
    Str,
    /// Exact `bytes`.
    Bytes,
    /// Exact `list`.
    List,
    /// Exact `tuple`.
    Tuple,
    /// Exact `dict`.
    Dict,
}

impl RefType {
    fn name(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
        }
    }

    fn matches(self, data: &HeapData) -> bool {
        match self {
            Self::Object => true,
            Self::Str => matches!(data, HeapData::Str(_)),
            Self::Bytes => matches!(data, HeapData::Bytes(_)),
            Self::List => matches!(data, HeapData::List(_)),
            Self::Tuple => matches!(data, HeapData::Tuple(_)),
            Self::Dict => matches!(data, HeapData::Dict(_)),
        }
    }
}

/// Compile-time description of one native attribute.
#[derive(Debug, Clone)]
pub struct AttrDescriptor {
    name: &'static str,
    kind: AttrKind,
    /// Word offset of the value within the instance.
    offset: usize,
    flags: AttrFlags,
    /// For float attributes: `(bitmap word offset, bit mask)`.
    bitmap: Option<(usize, u32)>,
    /// For reference attributes: the declared value type.
    ref_type: RefType,
}

impl AttrDescriptor {
    /// Describes a reference attribute.
    #[must_use]
    pub fn new_ref(name: &'static str, offset: usize, ref_type: RefType, flags: AttrFlags) -> Self {
        Self {
            name,
            kind: AttrKind::Ref,
            offset,
            flags,
            bitmap: None,
            ref_type,
        }
    }

    /// Describes a tagged-int attribute.
    #[must_use]
    pub fn new_tagged(name: &'static str, offset: usize, flags: AttrFlags) -> Self {
        Self {
            name,
            kind: AttrKind::TaggedInt,
            offset,
            flags,
            bitmap: None,
            ref_type: RefType::Object,
        }
    }

    /// Describes a bool attribute.
    #[must_use]
    pub fn new_bool(name: &'static str, offset: usize, flags: AttrFlags) -> Self {
        Self {
            name,
            kind: AttrKind::Bool,
            offset,
            flags,
            bitmap: None,
            ref_type: RefType::Object,
        }
    }

    /// Describes a float attribute with its definedness-bitmap position.
    #[must_use]
    pub fn new_float(name: &'static str, offset: usize, bitmap_offset: usize, bitmap_mask: u32, flags: AttrFlags) -> Self {
        Self {
            name,
            kind: AttrKind::Float,
            offset,
            flags,
            bitmap: Some((bitmap_offset, bitmap_mask)),
            ref_type: RefType::Object,
        }
    }

    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The storage kind.
    #[must_use]
    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    /// The word offset within the instance.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The behavior flags.
    #[must_use]
    pub fn flags(&self) -> AttrFlags {
        self.flags
    }
}

/// A human-readable type name for the set-mismatch `TypeError`. Tuples
/// expand element types recursively up to ten elements, then summarize.
fn type_desc(heap: &Heap, value: &Value) -> String {
    if let Value::Ref(id) = value
        && let HeapData::Tuple(tuple) = heap.get(*id)
    {
        if tuple.len() > 10 {
            return format!("tuple[{} items]", tuple.len());
        }
        let inner: Vec<String> = tuple.as_slice().iter().map(|item| type_desc(heap, item)).collect();
        return format!("tuple[{}]", inner.join(", "));
    }
    value.type_name(heap).to_owned()
}

fn class_name(heap: &Heap, instance: HeapId) -> String {
    let HeapData::Instance(inst) = heap.get(instance) else {
        unreachable!("attribute access on a non-instance");
    };
    let HeapData::Type(ty) = heap.get(inst.class()) else {
        unreachable!("instance class is not a type");
    };
    ty.name().to_owned()
}

fn is_defined(heap: &Heap, instance: HeapId, attr: &AttrDescriptor) -> bool {
    let HeapData::Instance(inst) = heap.get(instance) else {
        unreachable!("attribute access on a non-instance");
    };
    if attr.flags.contains(AttrFlags::ALWAYS_DEFINED) {
        return true;
    }
    let word = inst.word(attr.offset);
    match attr.kind {
        AttrKind::Ref => word != REF_UNDEFINED,
        AttrKind::TaggedInt => word != TaggedInt::ERROR_WORD,
        AttrKind::Bool => word != BOOL_UNDEFINED,
        AttrKind::Float => {
            let (bitmap_offset, mask) = attr.bitmap.unwrap_or_else(|| unreachable!("float attr without bitmap"));
            inst.word(bitmap_offset) as u32 & mask != 0
        }
    }
}

/// Reads a native attribute, boxing the stored value.
///
/// An undefined attribute raises `AttributeError` naming the class and the
/// attribute, unless the descriptor is `ALWAYS_DEFINED`.
pub fn native_getattr(heap: &mut Heap, instance: HeapId, attr: &AttrDescriptor) -> RunResult<Value> {
    if !is_defined(heap, instance, attr) {
        return Err(ExcType::attribute_undefined(class_name(heap, instance), attr.name));
    }
    let HeapData::Instance(inst) = heap.get(instance) else {
        unreachable!();
    };
    let word = inst.word(attr.offset);
    match attr.kind {
        AttrKind::Ref => {
            if word == REF_NONE {
                Ok(Value::None)
            } else {
                let id = HeapId::from_index((word - REF_ID_BIAS) as usize);
                heap.inc_ref(id);
                Ok(Value::Ref(id))
            }
        }
        AttrKind::TaggedInt => {
            let tagged = TaggedInt::from_word(word);
            let id = tagged.as_object(heap);
            Ok(Value::Ref(id))
        }
        AttrKind::Bool => Ok(Value::Bool(word == 1)),
        AttrKind::Float => Ok(Value::Float(f64::from_bits(word))),
    }
}

/// Writes a native attribute. `None` for `value` is a deletion request.
///
/// Steals the value reference. Type mismatches raise `TypeError` as
/// `"<expected> object expected; got <found>"`; deleting a non-deletable or
/// already-undefined attribute raises `AttributeError`.
pub fn native_setattr(heap: &mut Heap, instance: HeapId, attr: &AttrDescriptor, value: Option<Value>) -> RunResult<()> {
    let Some(value) = value else {
        return delete_attr(heap, instance, attr);
    };

    let new_word = match attr.kind {
        AttrKind::Ref => match &value {
            Value::None if attr.flags.contains(AttrFlags::ALLOW_NONE) => REF_NONE,
            Value::Ref(id) if attr.ref_type.matches(heap.get(*id)) => {
                // The stolen reference moves into the slot
                id.index() as u64 + REF_ID_BIAS
            }
            other => {
                let err = ExcType::type_error(format!(
                    "{} object expected; got {}",
                    attr.ref_type.name(),
                    type_desc(heap, other)
                ));
                value.drop_with_heap(heap);
                return Err(err);
            }
        },
        AttrKind::TaggedInt => match &value {
            Value::Bool(b) => TaggedInt::from_short(isize::from(*b)).to_word(),
            Value::Ref(id) if matches!(heap.get(*id), HeapData::Int(_)) => {
                let id = *id;
                TaggedInt::from_object_steal(heap, id).to_word()
            }
            other => {
                let err = ExcType::type_error(format!("int object expected; got {}", type_desc(heap, other)));
                value.drop_with_heap(heap);
                return Err(err);
            }
        },
        AttrKind::Bool => match &value {
            Value::Bool(b) => u64::from(*b),
            other => {
                let err = ExcType::type_error(format!("bool object expected; got {}", type_desc(heap, other)));
                value.drop_with_heap(heap);
                return Err(err);
            }
        },
        AttrKind::Float => match &value {
            Value::Float(f) => f.to_bits(),
            other => {
                let err = ExcType::type_error(format!("float object expected; got {}", type_desc(heap, other)));
                value.drop_with_heap(heap);
                return Err(err);
            }
        },
    };

    let old_word = heap.with_taken(instance, |_, data| {
        let HeapData::Instance(inst) = data else {
            unreachable!();
        };
        let old = inst.word(attr.offset);
        inst.set_word(attr.offset, new_word);
        if let Some((bitmap_offset, mask)) = attr.bitmap {
            inst.set_word(bitmap_offset, inst.word(bitmap_offset) | u64::from(mask));
        }
        old
    });
    release_old_word(heap, attr, old_word);
    Ok(())
}

fn delete_attr(heap: &mut Heap, instance: HeapId, attr: &AttrDescriptor) -> RunResult<()> {
    if !attr.flags.contains(AttrFlags::DELETABLE) {
        return Err(ExcType::attribute_undeletable(class_name(heap, instance), attr.name));
    }
    if !is_defined(heap, instance, attr) {
        return Err(ExcType::attribute_undefined(class_name(heap, instance), attr.name));
    }
    let cleared = match attr.kind {
        AttrKind::Ref => REF_UNDEFINED,
        AttrKind::TaggedInt => TaggedInt::ERROR_WORD,
        AttrKind::Bool => BOOL_UNDEFINED,
        AttrKind::Float => 0,
    };
    let old_word = heap.with_taken(instance, |_, data| {
        let HeapData::Instance(inst) = data else {
            unreachable!();
        };
        let old = inst.word(attr.offset);
        inst.set_word(attr.offset, cleared);
        if let Some((bitmap_offset, mask)) = attr.bitmap {
            inst.set_word(bitmap_offset, inst.word(bitmap_offset) & !u64::from(mask));
        }
        old
    });
    release_old_word(heap, attr, old_word);
    Ok(())
}

/// Releases whatever reference the displaced word held.
fn release_old_word(heap: &mut Heap, attr: &AttrDescriptor, old_word: u64) {
    match attr.kind {
        AttrKind::Ref => {
            if old_word >= REF_ID_BIAS {
                heap.dec_ref(HeapId::from_index((old_word - REF_ID_BIAS) as usize));
            }
        }
        AttrKind::TaggedInt => {
            if let Some(id) = TaggedInt::long_id_from_word(old_word) {
                heap.dec_ref(id);
            }
        }
        AttrKind::Bool | AttrKind::Float => {}
    }
}
