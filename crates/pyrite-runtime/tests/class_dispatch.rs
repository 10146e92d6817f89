//! Template-built classes exercised end to end: vtable dispatch over typed
//! native attributes, trait regions with the post-load fixup, builder error
//! paths, and reference-count balance across the whole flow.

use num_bigint::BigInt;
use pyrite_runtime::{
    attrs::{native_getattr, native_setattr, AttrDescriptor, AttrFlags, RefType},
    builder::{build_type_from_template, instantiate, TypeTemplate},
    exception::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    runtime::Runtime,
    types::class::{isinstance, Metaclass},
    value::Value,
    vtable::{
        dispatch_get, dispatch_method, dispatch_set, dispatch_trait_method, trait_attr_offset, NativeSlot,
        TraitEntry, TraitRef, VTable,
    },
};

fn x_attr() -> AttrDescriptor {
    AttrDescriptor::new_tagged("x", 0, AttrFlags::empty())
}

fn label_attr() -> AttrDescriptor {
    AttrDescriptor::new_ref("label", 1, RefType::Str, AttrFlags::DELETABLE)
}

fn get_x(runtime: &mut Runtime, instance: HeapId) -> RunResult<Value> {
    native_getattr(&mut runtime.heap, instance, &x_attr())
}

fn set_x(runtime: &mut Runtime, instance: HeapId, value: Value) -> RunResult<()> {
    native_setattr(&mut runtime.heap, instance, &x_attr(), Some(value))
}

fn get_label(runtime: &mut Runtime, instance: HeapId) -> RunResult<Value> {
    native_getattr(&mut runtime.heap, instance, &label_attr())
}

fn set_label(runtime: &mut Runtime, instance: HeapId, value: Value) -> RunResult<()> {
    native_setattr(&mut runtime.heap, instance, &label_attr(), Some(value))
}

fn clear_label(runtime: &mut Runtime, instance: HeapId, _args: &[Value]) -> RunResult<Value> {
    native_setattr(&mut runtime.heap, instance, &label_attr(), None)?;
    Ok(Value::None)
}

const GET_X: usize = 0;
const SET_X: usize = 1;
const GET_LABEL: usize = 2;
const SET_LABEL: usize = 3;
const CLEAR_LABEL: usize = 4;

fn point_class(runtime: &mut Runtime) -> HeapId {
    let vtable = runtime.vtables.register(VTable::new(
        vec![
            NativeSlot::Getter(get_x),
            NativeSlot::Setter(set_x),
            NativeSlot::Getter(get_label),
            NativeSlot::Setter(set_label),
            NativeSlot::Method(clear_label),
        ],
        Vec::new(),
    ));
    let template = TypeTemplate {
        name: "Point",
        metaclass: Metaclass::Type,
        attrs: vec![x_attr(), label_attr()],
        instance_words: 2,
        vtable: Some(vtable),
        slots: &[],
        methods: Vec::new(),
    };
    build_type_from_template(runtime, &template, &[], "tests").unwrap()
}

#[test]
fn attribute_flow_through_the_vtable() {
    let mut runtime = Runtime::new();
    let class = point_class(&mut runtime);
    let obj = instantiate(&mut runtime, class).unwrap();
    let Value::Ref(inst) = obj else { unreachable!() };

    // Fresh instances start fully undefined
    let err = dispatch_get(&mut runtime, inst, GET_X).unwrap_err();
    let RunError::Exc(exc) = err else { unreachable!() };
    assert_eq!(exc.exc_type(), ExcType::AttributeError);
    assert_eq!(exc.message(), Some("attribute 'x' of 'Point' undefined"));

    let five = Value::Ref(runtime.heap.allocate(HeapData::Int(BigInt::from(5))));
    dispatch_set(&mut runtime, inst, SET_X, five).unwrap();
    let got = dispatch_get(&mut runtime, inst, GET_X).unwrap();
    assert_eq!(got.as_int(&runtime.heap), Some(&BigInt::from(5)));
    got.drop_with_heap(&mut runtime.heap);

    let name = Value::Ref(runtime.heap.allocate(HeapData::Str("origin".into())));
    dispatch_set(&mut runtime, inst, SET_LABEL, name).unwrap();
    let got = dispatch_get(&mut runtime, inst, GET_LABEL).unwrap();
    assert_eq!(got.as_str(&runtime.heap), Some("origin"));
    got.drop_with_heap(&mut runtime.heap);

    // Method slot: deletion through the deletable descriptor
    let result = dispatch_method(&mut runtime, inst, CLEAR_LABEL, &[]).unwrap();
    assert_eq!(result, Value::None);
    assert!(dispatch_get(&mut runtime, inst, GET_LABEL).is_err());

    runtime.heap.dec_ref(inst);
    runtime.heap.dec_ref(class);
}

#[test]
fn setter_type_mismatch_names_both_types() {
    let mut runtime = Runtime::new();
    let class = point_class(&mut runtime);
    let obj = instantiate(&mut runtime, class).unwrap();
    let Value::Ref(inst) = obj else { unreachable!() };

    let err = dispatch_set(&mut runtime, inst, SET_LABEL, Value::Float(1.5)).unwrap_err();
    let RunError::Exc(exc) = err else { unreachable!() };
    assert_eq!(exc.message(), Some("str object expected; got float"));

    runtime.heap.dec_ref(inst);
    runtime.heap.dec_ref(class);
}

#[test]
fn attribute_churn_balances_the_heap() {
    let mut runtime = Runtime::new();
    let class = point_class(&mut runtime);
    let baseline = runtime.heap.stats();

    let obj = instantiate(&mut runtime, class).unwrap();
    let Value::Ref(inst) = obj else { unreachable!() };
    for i in 0..10 {
        let n = Value::Ref(runtime.heap.allocate(HeapData::Int(BigInt::from(2).pow(70) + i)));
        dispatch_set(&mut runtime, inst, SET_X, n).unwrap();
        let s = Value::Ref(runtime.heap.allocate(HeapData::Str("tick".into())));
        dispatch_set(&mut runtime, inst, SET_LABEL, s).unwrap();
        let x = dispatch_get(&mut runtime, inst, GET_X).unwrap();
        x.drop_with_heap(&mut runtime.heap);
    }
    runtime.heap.dec_ref(inst);

    assert_eq!(runtime.heap.stats().live_objects, baseline.live_objects);
    runtime.heap.dec_ref(class);
}

#[test]
fn trait_region_dispatch_after_fixup() {
    let mut runtime = Runtime::new();

    // The trait type itself: no vtable, never instantiated
    let trait_template = TypeTemplate {
        name: "Measurable",
        metaclass: Metaclass::Type,
        attrs: Vec::new(),
        instance_words: 0,
        vtable: None,
        slots: &[],
        methods: Vec::new(),
    };
    let trait_type = build_type_from_template(&mut runtime, &trait_template, &[], "tests").unwrap();
    assert!(instantiate(&mut runtime, trait_type).is_err());

    fn measure(runtime: &mut Runtime, instance: HeapId, _args: &[Value]) -> RunResult<Value> {
        native_getattr(&mut runtime.heap, instance, &x_attr())
    }
    let sub_vtable = runtime
        .vtables
        .register(VTable::new(vec![NativeSlot::Method(measure)], Vec::new()));
    // Registered before the class exists, so the trait reference is an index
    // into the module's load order
    let concrete_vtable = runtime.vtables.register(VTable::new(
        vec![NativeSlot::Getter(get_x), NativeSlot::Setter(set_x)],
        vec![TraitEntry::new(TraitRef::Indirect(0), sub_vtable, vec![0])],
    ));

    let template = TypeTemplate {
        name: "Square",
        metaclass: Metaclass::Type,
        attrs: vec![x_attr()],
        instance_words: 1,
        vtable: Some(concrete_vtable),
        slots: &[],
        methods: Vec::new(),
    };
    let class = build_type_from_template(&mut runtime, &template, &[trait_type], "tests").unwrap();
    runtime.vtables.fixup_traits(&[trait_type, class]);

    let obj = instantiate(&mut runtime, class).unwrap();
    let Value::Ref(inst) = obj else { unreachable!() };
    let seven = Value::Ref(runtime.heap.allocate(HeapData::Int(BigInt::from(7))));
    dispatch_set(&mut runtime, inst, SET_X, seven).unwrap();

    let got = dispatch_trait_method(&mut runtime, inst, trait_type, 0, &[]).unwrap();
    assert_eq!(got.as_int(&runtime.heap), Some(&BigInt::from(7)));
    got.drop_with_heap(&mut runtime.heap);
    assert_eq!(trait_attr_offset(&runtime, inst, trait_type, 0), 0);

    // isinstance sees the trait both through the MRO and the trait region
    let obj = Value::Ref(inst);
    assert!(isinstance(&runtime.heap, &runtime.vtables, &obj, trait_type));
    assert!(isinstance(&runtime.heap, &runtime.vtables, &obj, class));

    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);
    runtime.heap.dec_ref(trait_type);
}

#[test]
fn sibling_metaclasses_conflict() {
    let mut runtime = Runtime::new();
    let mut generic = TypeTemplate {
        name: "G",
        metaclass: Metaclass::GenericMeta,
        attrs: Vec::new(),
        instance_words: 0,
        vtable: None,
        slots: &[],
        methods: Vec::new(),
    };
    let g = build_type_from_template(&mut runtime, &generic, &[], "tests").unwrap();
    generic.name = "P";
    generic.metaclass = Metaclass::ProtocolMeta;
    let p = build_type_from_template(&mut runtime, &generic, &[], "tests").unwrap();

    generic.name = "Child";
    generic.metaclass = Metaclass::Type;
    let err = build_type_from_template(&mut runtime, &generic, &[g, p], "tests").unwrap_err();
    let RunError::Exc(exc) = err else { unreachable!() };
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert!(exc.message().unwrap().starts_with("metaclass conflict"));

    runtime.heap.dec_ref(p);
    runtime.heap.dec_ref(g);
}

#[test]
fn inconsistent_bases_fail_linearization() {
    let mut runtime = Runtime::new();
    let plain = |name| TypeTemplate {
        name,
        metaclass: Metaclass::Type,
        attrs: Vec::new(),
        instance_words: 0,
        vtable: None,
        slots: &[],
        methods: Vec::new(),
    };
    let a = build_type_from_template(&mut runtime, &plain("A"), &[], "tests").unwrap();
    let b = build_type_from_template(&mut runtime, &plain("B"), &[a], "tests").unwrap();

    // (A, B) puts a base before its own subclass
    let err = build_type_from_template(&mut runtime, &plain("Broken"), &[a, b], "tests").unwrap_err();
    let RunError::Exc(exc) = err else { unreachable!() };
    assert!(exc.message().unwrap().contains("method resolution order"));

    runtime.heap.dec_ref(b);
    runtime.heap.dec_ref(a);
}
