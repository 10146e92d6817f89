//! Per-class dispatch tables: a constant-index primary region for the
//! class's own getters, setters, and methods, and a trait region of
//! `(trait type, sub-vtable, attribute offsets)` entries located by linear
//! scan.
//!
//! Slot indices are compile-time constants baked into call sites; the
//! dispatcher casts nothing and checks nothing beyond the slot variant,
//! which the compiler guarantees. Trait presence is likewise a compile-time
//! fact, so a failed trait scan is a compiler bug, not a runtime condition.

use crate::{
    exception::RunResult,
    heap::{HeapData, HeapId},
    runtime::Runtime,
    value::Value,
};

/// Native attribute getter: `(runtime, instance) -> value`.
pub type GetterFn = fn(&mut Runtime, HeapId) -> RunResult<Value>;
/// Native attribute setter: `(runtime, instance, value)`. Steals the value
/// reference.
pub type SetterFn = fn(&mut Runtime, HeapId, Value) -> RunResult<()>;
/// Native method: `(runtime, instance, args) -> value`. Args are borrowed.
pub type MethodFn = fn(&mut Runtime, HeapId, &[Value]) -> RunResult<Value>;

/// One primary-region slot. The variant is the signature the compiler
/// emitted for this index.
#[derive(Debug, Clone, Copy)]
pub enum NativeSlot {
    /// Attribute read.
    Getter(GetterFn),
    /// Attribute write.
    Setter(SetterFn),
    /// Method call.
    Method(MethodFn),
}

/// A trait type reference in a trait entry.
///
/// Entries are registered before the module's classes exist, so they start
/// as an `Indirect` index into the load-order class list; the post-load
/// fixup pass rewrites each to the `Direct` type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraitRef {
    /// Index into the load-order class table, pre-fixup.
    Indirect(usize),
    /// The trait's type object, post-fixup.
    Direct(HeapId),
}

/// One trait-region entry: which trait, where its methods live, and where
/// its attributes land on this concrete class.
#[derive(Debug)]
pub struct TraitEntry {
    trait_type: TraitRef,
    sub_vtable: VTableId,
    /// Maps the trait's attribute index to the word offset on the concrete
    /// instance.
    attr_offsets: Vec<usize>,
}

impl TraitEntry {
    /// Creates a trait entry, normally in `Indirect` form.
    #[must_use]
    pub fn new(trait_type: TraitRef, sub_vtable: VTableId, attr_offsets: Vec<usize>) -> Self {
        Self {
            trait_type,
            sub_vtable,
            attr_offsets,
        }
    }
}

/// A class's dispatch table.
#[derive(Debug, Default)]
pub struct VTable {
    primary: Vec<NativeSlot>,
    traits: Vec<TraitEntry>,
}

impl VTable {
    /// Creates a table from its primary region and trait entries.
    #[must_use]
    pub fn new(primary: Vec<NativeSlot>, traits: Vec<TraitEntry>) -> Self {
        Self { primary, traits }
    }

    /// The slot at a compile-time-constant primary index.
    #[must_use]
    pub fn slot(&self, index: usize) -> NativeSlot {
        self.primary[index]
    }

    /// True when the trait region carries `trait_type`.
    #[must_use]
    pub fn implements_trait(&self, trait_type: HeapId) -> bool {
        self.traits
            .iter()
            .any(|entry| entry.trait_type == TraitRef::Direct(trait_type))
    }

    /// Linear scan of the trait region for `trait_type`.
    ///
    /// Trait presence is a compile-time guarantee; a miss is unreachable.
    #[must_use]
    pub fn trait_entry(&self, trait_type: HeapId) -> &TraitEntry {
        self.traits
            .iter()
            .find(|entry| entry.trait_type == TraitRef::Direct(trait_type))
            .unwrap_or_else(|| unreachable!("trait not implemented by this class"))
    }
}

/// Handle to a registered vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTableId(usize);

/// Process-wide vtable storage. Tables are registered at module load and
/// never freed.
#[derive(Debug, Default)]
pub struct VTableRegistry {
    tables: Vec<VTable>,
}

impl VTableRegistry {
    /// Registers a table, returning its handle.
    pub fn register(&mut self, table: VTable) -> VTableId {
        self.tables.push(table);
        VTableId(self.tables.len() - 1)
    }

    /// Returns the table behind a handle.
    #[must_use]
    pub fn get(&self, id: VTableId) -> &VTable {
        &self.tables[id.0]
    }

    /// The post-load fixup pass: rewrites every `Indirect` trait reference
    /// into the `Direct` type id via the load-order class table.
    pub fn fixup_traits(&mut self, load_order: &[HeapId]) {
        for table in &mut self.tables {
            for entry in &mut table.traits {
                if let TraitRef::Indirect(pos) = entry.trait_type {
                    entry.trait_type = TraitRef::Direct(load_order[pos]);
                }
            }
        }
    }
}

/// Primary-region attribute read at a statically-known index.
pub fn dispatch_get(runtime: &mut Runtime, instance: HeapId, index: usize) -> RunResult<Value> {
    let NativeSlot::Getter(f) = slot_of(runtime, instance, index) else {
        unreachable!("slot {index} is not a getter");
    };
    f(runtime, instance)
}

/// Primary-region attribute write at a statically-known index. Steals the
/// value reference.
pub fn dispatch_set(runtime: &mut Runtime, instance: HeapId, index: usize, value: Value) -> RunResult<()> {
    let NativeSlot::Setter(f) = slot_of(runtime, instance, index) else {
        unreachable!("slot {index} is not a setter");
    };
    f(runtime, instance, value)
}

/// Primary-region method call at a statically-known index.
pub fn dispatch_method(runtime: &mut Runtime, instance: HeapId, index: usize, args: &[Value]) -> RunResult<Value> {
    let NativeSlot::Method(f) = slot_of(runtime, instance, index) else {
        unreachable!("slot {index} is not a method");
    };
    f(runtime, instance, args)
}

/// Trait method call: scans the instance's trait region for `trait_type`,
/// then indexes its sub-vtable at `sub_index`.
pub fn dispatch_trait_method(
    runtime: &mut Runtime,
    instance: HeapId,
    trait_type: HeapId,
    sub_index: usize,
    args: &[Value],
) -> RunResult<Value> {
    let vtable = instance_vtable(runtime, instance);
    let entry = runtime.vtables.get(vtable).trait_entry(trait_type);
    let NativeSlot::Method(f) = runtime.vtables.get(entry.sub_vtable).slot(sub_index) else {
        unreachable!("trait slot {sub_index} is not a method");
    };
    f(runtime, instance, args)
}

/// Resolves where a trait's attribute lives on the concrete instance.
#[must_use]
pub fn trait_attr_offset(runtime: &Runtime, instance: HeapId, trait_type: HeapId, attr_index: usize) -> usize {
    let vtable = instance_vtable(runtime, instance);
    let entry = runtime.vtables.get(vtable).trait_entry(trait_type);
    entry.attr_offsets[attr_index]
}

fn instance_vtable(runtime: &Runtime, instance: HeapId) -> VTableId {
    let HeapData::Instance(inst) = runtime.heap.get(instance) else {
        unreachable!("vtable dispatch on a non-instance");
    };
    inst.vtable()
}

fn slot_of(runtime: &Runtime, instance: HeapId, index: usize) -> NativeSlot {
    let vtable = instance_vtable(runtime, instance);
    runtime.vtables.get(vtable).slot(index)
}
