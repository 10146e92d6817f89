//! Type objects, compiled-class instances, and the pieces of the class
//! machinery shared between construction and dispatch: metaclass
//! resolution, C3 linearization, namespace lookup, and `isinstance`.

use std::rc::Rc;

use strum::IntoStaticStr;

use crate::{
    attrs::{AttrDescriptor, AttrKind},
    exception::{ExcType, RunResult},
    heap::{ChildIds, Heap, HeapData, HeapId},
    tagged::TaggedInt,
    types::Dict,
    value::Value,
    vtable::{VTableId, VTableRegistry},
};

/// The metaclasses a compiled class may be built with.
///
/// Compiled instance layouts are fixed at compile time, so only `type`
/// itself and the known-cooperative metaclasses from the host's `abc` and
/// `typing` machinery are accepted. Anything else is rejected during
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum Metaclass {
    /// The default metaclass.
    #[strum(serialize = "type")]
    Type,
    /// `abc.ABCMeta`.
    #[strum(serialize = "ABCMeta")]
    AbcMeta,
    /// The legacy `typing.GenericMeta` (pre-3.7 typing).
    #[strum(serialize = "GenericMeta")]
    GenericMeta,
    /// `typing._ProtocolMeta`.
    #[strum(serialize = "_ProtocolMeta")]
    ProtocolMeta,
}

impl Metaclass {
    /// True when `self` is `other` or derives from it.
    ///
    /// `ABCMeta` derives from `type`; both typing metaclasses derive from
    /// `ABCMeta`.
    #[must_use]
    pub fn derives_from(self, other: Self) -> bool {
        self == other
            || other == Self::Type
            || (other == Self::AbcMeta && matches!(self, Self::GenericMeta | Self::ProtocolMeta))
    }

    /// The Python-visible name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Picks the most-derived metaclass among the declared one and those of the
/// resolved bases, raising the host's metaclass-conflict `TypeError` when
/// two candidates are unrelated.
pub fn effective_metaclass(heap: &Heap, declared: Metaclass, bases: &[HeapId]) -> RunResult<Metaclass> {
    let mut winner = declared;
    for &base in bases {
        let HeapData::Type(base_ty) = heap.get(base) else {
            continue;
        };
        let candidate = base_ty.metaclass();
        if candidate.derives_from(winner) {
            winner = candidate;
        } else if !winner.derives_from(candidate) {
            return Err(ExcType::type_error(
                "metaclass conflict: the metaclass of a derived class must be a (non-strict) \
                 subclass of the metaclasses of all its bases",
            ));
        }
    }
    Ok(winner)
}

/// A class object, either synthesized from a compile-time template or
/// registered directly by a test.
///
/// The MRO is stored without its leading `self` entry (a type cannot own a
/// reference to itself without cycling); [`full_mro`] materializes the
/// complete list.
#[derive(Debug)]
pub struct TypeObject {
    name: String,
    module: String,
    metaclass: Metaclass,
    bases: Vec<HeapId>,
    mro_tail: Vec<HeapId>,
    namespace: Dict,
    vtable: Option<VTableId>,
    attrs: Rc<[AttrDescriptor]>,
    /// Instance storage size in words, bitmap words included.
    instance_words: usize,
    orig_bases: Option<HeapId>,
}

impl TypeObject {
    /// Creates a type object. Takes ownership of the references in `bases`,
    /// `mro_tail`, `namespace`, and `orig_bases`.
    #[expect(clippy::too_many_arguments, reason = "construction-time record")]
    #[must_use]
    pub fn new(
        name: String,
        module: String,
        metaclass: Metaclass,
        bases: Vec<HeapId>,
        mro_tail: Vec<HeapId>,
        namespace: Dict,
        vtable: Option<VTableId>,
        attrs: Rc<[AttrDescriptor]>,
        instance_words: usize,
        orig_bases: Option<HeapId>,
    ) -> Self {
        Self {
            name,
            module,
            metaclass,
            bases,
            mro_tail,
            namespace,
            vtable,
            attrs,
            instance_words,
            orig_bases,
        }
    }

    /// `__name__`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `__module__`.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The effective metaclass.
    #[must_use]
    pub fn metaclass(&self) -> Metaclass {
        self.metaclass
    }

    /// `__bases__`, the resolved base list.
    #[must_use]
    pub fn bases(&self) -> &[HeapId] {
        &self.bases
    }

    /// The MRO past `self`.
    #[must_use]
    pub fn mro_tail(&self) -> &[HeapId] {
        &self.mro_tail
    }

    /// The class namespace (`__dict__`).
    #[must_use]
    pub fn namespace(&self) -> &Dict {
        &self.namespace
    }

    /// Mutable access to the class namespace, for construction-time merges.
    pub fn namespace_mut(&mut self) -> &mut Dict {
        &mut self.namespace
    }

    /// The dispatch table id, absent on trait (mixin) types that are never
    /// instantiated directly.
    #[must_use]
    pub fn vtable(&self) -> Option<VTableId> {
        self.vtable
    }

    /// The native attribute layout.
    #[must_use]
    pub fn attrs(&self) -> &Rc<[AttrDescriptor]> {
        &self.attrs
    }

    /// Instance storage size in words.
    #[must_use]
    pub fn instance_words(&self) -> usize {
        self.instance_words
    }

    /// `__orig_bases__`, present only when base rewriting occurred.
    #[must_use]
    pub fn orig_bases(&self) -> Option<HeapId> {
        self.orig_bases
    }

    /// Replaces `__orig_bases__`, returning the previous tuple id.
    pub fn set_orig_bases(&mut self, orig: Option<HeapId>) -> Option<HeapId> {
        std::mem::replace(&mut self.orig_bases, orig)
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.extend(self.bases.iter().copied());
        out.extend(self.mro_tail.iter().copied());
        self.namespace.child_ids(out);
        if let Some(orig) = self.orig_bases {
            out.push(orig);
        }
    }
}

/// The full MRO of a type: itself followed by its stored tail.
#[must_use]
pub fn full_mro(heap: &Heap, type_id: HeapId) -> Vec<HeapId> {
    let HeapData::Type(ty) = heap.get(type_id) else {
        unreachable!("full_mro: not a type");
    };
    let mut mro = Vec::with_capacity(1 + ty.mro_tail().len());
    mro.push(type_id);
    mro.extend(ty.mro_tail());
    mro
}

/// C3 linearization of a declared base list.
///
/// Returns the MRO past the class itself (the class is prepended by the
/// caller). The returned ids are borrowed; the caller acquires references
/// when it stores them.
pub fn compute_c3_mro(heap: &Heap, bases: &[HeapId]) -> RunResult<Vec<HeapId>> {
    let mut sequences: Vec<Vec<HeapId>> = bases.iter().map(|&b| full_mro(heap, b)).collect();
    sequences.push(bases.to_vec());

    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        // A head is a good candidate when it appears in no sequence's tail
        let candidate = sequences
            .iter()
            .map(|s| s[0])
            .find(|&head| !sequences.iter().any(|s| s[1..].contains(&head)));
        let Some(next) = candidate else {
            let names: Vec<&str> = bases
                .iter()
                .map(|&b| match heap.get(b) {
                    HeapData::Type(ty) => ty.name(),
                    other => other.type_name(),
                })
                .collect();
            return Err(ExcType::type_error(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {}",
                names.join(", ")
            )));
        };
        result.push(next);
        for seq in &mut sequences {
            seq.retain(|&id| id != next);
        }
    }
}

/// Inserts into a type object's namespace dict. Steals both references.
pub fn namespace_set(heap: &mut Heap, type_id: HeapId, key: Value, value: Value) -> RunResult<()> {
    heap.with_taken(type_id, |heap, data| {
        let HeapData::Type(ty) = data else {
            unreachable!("namespace_set: not a type");
        };
        ty.namespace_mut().insert(heap, key, value)
    })
}

/// Looks `name` up through a type's MRO, returning a fresh reference to the
/// first namespace hit.
#[must_use]
pub fn type_lookup(heap: &Heap, type_id: HeapId, name: &str) -> Option<Value> {
    for ty_id in full_mro(heap, type_id) {
        let HeapData::Type(ty) = heap.get(ty_id) else {
            unreachable!("type_lookup: MRO entry not a type");
        };
        for (key, value) in ty.namespace().iter() {
            if key.as_str(heap) == Some(name) {
                return Some(value.clone_ref(heap));
            }
        }
    }
    None
}

/// An instance of a compiled class.
///
/// Attribute storage is a flat array of words, laid out by the compiler:
/// reference attributes store `heap id + 2` (`0` undefined, `1` None),
/// tagged-int attributes store the tagged bits (`tag-only` means undefined),
/// bool attributes store `0`/`1` (`2` undefined), float attributes store the
/// IEEE-754 bits with definedness tracked in a separate bitmap word.
#[derive(Debug)]
pub struct Instance {
    class: HeapId,
    vtable: VTableId,
    layout: Rc<[AttrDescriptor]>,
    words: Vec<u64>,
}

/// Reference-attribute word meaning "no value stored".
pub(crate) const REF_UNDEFINED: u64 = 0;
/// Reference-attribute word meaning `None`.
pub(crate) const REF_NONE: u64 = 1;
/// Bias added to a heap index stored in a reference-attribute word.
pub(crate) const REF_ID_BIAS: u64 = 2;
/// Bool-attribute word meaning "no value stored".
pub(crate) const BOOL_UNDEFINED: u64 = 2;

impl Instance {
    /// Allocates instance storage with every attribute undefined.
    ///
    /// Takes ownership of one reference to `class`.
    #[must_use]
    pub fn new(class: HeapId, vtable: VTableId, layout: Rc<[AttrDescriptor]>, word_count: usize) -> Self {
        let mut words = vec![0_u64; word_count];
        for attr in layout.iter() {
            match attr.kind() {
                AttrKind::Ref => words[attr.offset()] = REF_UNDEFINED,
                AttrKind::TaggedInt => words[attr.offset()] = TaggedInt::ERROR_WORD,
                AttrKind::Bool => words[attr.offset()] = BOOL_UNDEFINED,
                // Bitmap bit starts clear, which already means undefined
                AttrKind::Float => words[attr.offset()] = 0,
            }
        }
        Self {
            class,
            vtable,
            layout,
            words,
        }
    }

    /// The instance's class.
    #[must_use]
    pub fn class(&self) -> HeapId {
        self.class
    }

    /// The dispatch table for this instance.
    #[must_use]
    pub fn vtable(&self) -> VTableId {
        self.vtable
    }

    /// The attribute layout.
    #[must_use]
    pub fn layout(&self) -> &Rc<[AttrDescriptor]> {
        &self.layout
    }

    /// Raw word read at a layout offset.
    #[must_use]
    pub(crate) fn word(&self, offset: usize) -> u64 {
        self.words[offset]
    }

    /// Raw word write at a layout offset.
    pub(crate) fn set_word(&mut self, offset: usize, word: u64) {
        self.words[offset] = word;
    }

    /// Collects owned heap references for recursive release, decoding the
    /// raw words through the layout.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.push(self.class);
        for attr in self.layout.iter() {
            let word = self.words[attr.offset()];
            match attr.kind() {
                AttrKind::Ref => {
                    if word >= REF_ID_BIAS {
                        out.push(HeapId::from_index((word - REF_ID_BIAS) as usize));
                    }
                }
                AttrKind::TaggedInt => {
                    if let Some(id) = TaggedInt::long_id_from_word(word) {
                        out.push(id);
                    }
                }
                AttrKind::Bool | AttrKind::Float => {}
            }
        }
    }
}

/// `isinstance(value, class)` for compiled classes.
///
/// True when the value is an instance whose class MRO contains `class`, or
/// whose vtable's trait region carries `class` as an implemented trait.
#[must_use]
pub fn isinstance(heap: &Heap, vtables: &VTableRegistry, value: &Value, class: HeapId) -> bool {
    let Value::Ref(id) = value else {
        return false;
    };
    let HeapData::Instance(inst) = heap.get(*id) else {
        return false;
    };
    if inst.class() == class || full_mro(heap, inst.class()).contains(&class) {
        return true;
    }
    vtables.get(inst.vtable()).implements_trait(class)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_type(heap: &mut Heap, name: &str, bases: Vec<HeapId>, mro_tail: Vec<HeapId>) -> HeapId {
        heap.allocate(HeapData::Type(TypeObject::new(
            name.to_owned(),
            "tests".to_owned(),
            Metaclass::Type,
            bases,
            mro_tail,
            Dict::default(),
            None,
            Rc::from([]),
            0,
            None,
        )))
    }

    #[test]
    fn diamond_linearizes_left_to_right() {
        let mut heap = Heap::default();
        let root = bare_type(&mut heap, "Root", vec![], vec![]);
        // B and C each own two references (base + mro_tail); the allocation
        // reference stays this test's handle
        heap.inc_ref(root);
        heap.inc_ref(root);
        let b = bare_type(&mut heap, "B", vec![root], vec![root]);
        heap.inc_ref(root);
        heap.inc_ref(root);
        let c = bare_type(&mut heap, "C", vec![root], vec![root]);

        let mro = compute_c3_mro(&heap, &[b, c]).unwrap();
        assert_eq!(mro, vec![b, c, root]);
        heap.dec_ref(c);
        heap.dec_ref(b);
        heap.dec_ref(root);
    }

    #[test]
    fn inconsistent_order_is_rejected() {
        let mut heap = Heap::default();
        let a = bare_type(&mut heap, "A", vec![], vec![]);
        heap.inc_ref(a);
        heap.inc_ref(a);
        let b = bare_type(&mut heap, "B", vec![a], vec![a]);
        // (A, B) is inconsistent: B's MRO wants B before A, but the base
        // order wants A before B
        let err = compute_c3_mro(&heap, &[a, b]).unwrap_err();
        let crate::exception::RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.exc_type(), ExcType::TypeError);
        assert!(exc.message().unwrap().starts_with("Cannot create a consistent"));
        heap.dec_ref(b);
        heap.dec_ref(a);
    }

    #[test]
    fn metaclass_resolution_and_conflict() {
        let mut heap = Heap::default();
        let abc_based = heap.allocate(HeapData::Type(TypeObject::new(
            "HasAbc".to_owned(),
            "tests".to_owned(),
            Metaclass::AbcMeta,
            vec![],
            vec![],
            Dict::default(),
            None,
            Rc::from([]),
            0,
            None,
        )));
        let winner = effective_metaclass(&heap, Metaclass::Type, &[abc_based]).unwrap();
        assert_eq!(winner, Metaclass::AbcMeta);

        let proto_based = heap.allocate(HeapData::Type(TypeObject::new(
            "HasProto".to_owned(),
            "tests".to_owned(),
            Metaclass::ProtocolMeta,
            vec![],
            vec![],
            Dict::default(),
            None,
            Rc::from([]),
            0,
            None,
        )));
        // GenericMeta and _ProtocolMeta are siblings under ABCMeta
        assert!(effective_metaclass(&heap, Metaclass::GenericMeta, &[proto_based]).is_err());
        heap.dec_ref(proto_based);
        heap.dec_ref(abc_based);
    }

    #[test]
    fn lookup_walks_the_mro() {
        let mut heap = Heap::default();
        let base = bare_type(&mut heap, "Base", vec![], vec![]);
        let key = Value::Ref(heap.allocate(HeapData::Str("shared".into())));
        namespace_set(&mut heap, base, key, Value::Bool(true)).unwrap();

        heap.inc_ref(base);
        heap.inc_ref(base);
        let derived = bare_type(&mut heap, "Derived", vec![base], vec![base]);
        let hit = type_lookup(&heap, derived, "shared");
        assert_eq!(hit, Some(Value::Bool(true)));
        assert_eq!(type_lookup(&heap, derived, "absent"), None);
        heap.dec_ref(derived);
        heap.dec_ref(base);
    }
}
