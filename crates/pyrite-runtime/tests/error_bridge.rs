//! Bridging between the sentinel-return model and the thread-state error
//! indicator: catch regions, re-raise, traceback stitching, and the
//! `yield from` dispatch outcomes.

use pyrite_runtime::{
    bridge::{
        add_traceback, clear_pending, error_catch, error_pending, error_restore, exc_info, exc_matches, raise,
        reraise, set_pending, yield_from_except, YieldFromResult,
    },
    builder::{build_type_from_template, instantiate, TypeTemplate},
    exception::{ExcType, RunError, RunResult, SimpleException},
    function::NativeFn,
    heap::{HeapData, HeapId},
    runtime::Runtime,
    types::class::Metaclass,
    value::Value,
    vtable::VTable,
};

fn park(runtime: &mut Runtime, exc_type: ExcType, msg: &str) {
    set_pending(runtime, RunError::Exc(SimpleException::new_msg(exc_type, msg)));
}

#[test]
fn catch_with_no_pending_error_is_a_runtime_error() {
    let mut runtime = Runtime::new();
    let err = error_catch(&mut runtime).unwrap_err();
    let RunError::Exc(exc) = err else { unreachable!() };
    assert_eq!(exc.exc_type(), ExcType::RuntimeError);
}

#[test]
fn catch_installs_exc_info_and_clears_indicator() {
    let mut runtime = Runtime::new();
    park(&mut runtime, ExcType::ValueError, "boom");

    let saved = error_catch(&mut runtime).unwrap();
    assert!(!error_pending(&runtime));
    assert!(exc_matches(&runtime, ExcType::ValueError));
    assert!(exc_matches(&runtime, ExcType::Exception));
    assert!(!exc_matches(&runtime, ExcType::LookupError));

    error_restore(&mut runtime, saved);
    assert!(!exc_matches(&runtime, ExcType::ValueError));
}

#[test]
fn reentering_a_catch_sees_identical_exc_info() {
    let mut runtime = Runtime::new();
    park(&mut runtime, ExcType::KeyError, "k");
    let saved = error_catch(&mut runtime).unwrap();
    let first = exc_info(&runtime);

    // Leave and re-enter: re-raise, restore, catch again
    reraise(&mut runtime).unwrap();
    error_restore(&mut runtime, saved);
    let saved = error_catch(&mut runtime).unwrap();
    let second = exc_info(&runtime);

    assert_eq!(first.exc_type, second.exc_type);
    assert_eq!(first.value, second.value);
    first.drop_with_heap(&mut runtime.heap);
    second.drop_with_heap(&mut runtime.heap);
    error_restore(&mut runtime, saved);
}

#[test]
fn reraise_reinstates_the_same_exception_object() {
    let mut runtime = Runtime::new();
    park(&mut runtime, ExcType::IndexError, "oob");
    let saved = error_catch(&mut runtime).unwrap();
    let info = exc_info(&runtime);
    let Value::Ref(original) = info.value else { unreachable!() };

    reraise(&mut runtime).unwrap();
    assert!(error_pending(&runtime));
    // Catch again and compare object identity
    error_restore(&mut runtime, saved);
    let saved = error_catch(&mut runtime).unwrap();
    let info2 = exc_info(&runtime);
    assert_eq!(info2.value, Value::Ref(original));

    runtime.heap.dec_ref(original);
    info.exc_type.drop_with_heap(&mut runtime.heap);
    info.traceback.drop_with_heap(&mut runtime.heap);
    info2.drop_with_heap(&mut runtime.heap);
    error_restore(&mut runtime, saved);
}

#[test]
fn raise_a_bare_type_instantiates_it() {
    let mut runtime = Runtime::new();
    raise(&mut runtime, Value::ExcType(ExcType::ZeroDivisionError)).unwrap();
    assert!(error_pending(&runtime));
    let saved = error_catch(&mut runtime).unwrap();
    assert!(exc_matches(&runtime, ExcType::ArithmeticError));
    error_restore(&mut runtime, saved);
}

#[test]
fn traceback_frames_stack_innermost_first() {
    let mut runtime = Runtime::new();
    park(&mut runtime, ExcType::ValueError, "deep");
    add_traceback(&mut runtime, "inner.py", "inner_fn", 10);
    add_traceback(&mut runtime, "outer.py", "outer_fn", 42);

    let saved = error_catch(&mut runtime).unwrap();
    let info = exc_info(&runtime);
    let Value::Ref(exc_id) = info.value else { unreachable!() };
    let HeapData::Exception(exc) = runtime.heap.get(exc_id) else { unreachable!() };
    let head = exc.traceback().unwrap();

    let HeapData::Traceback(outer) = runtime.heap.get(head) else { unreachable!() };
    assert_eq!(outer.lineno(), 42);
    let next = outer.next().unwrap();
    let HeapData::Traceback(inner) = runtime.heap.get(next) else { unreachable!() };
    assert_eq!(inner.lineno(), 10);
    assert_eq!(inner.next(), None);

    let frame = inner.frame();
    let HeapData::Frame(f) = runtime.heap.get(frame) else { unreachable!() };
    let HeapData::Code(code) = runtime.heap.get(f.code()) else { unreachable!() };
    assert_eq!(code.filename, "inner.py");
    assert_eq!(code.name, "inner_fn");

    runtime.heap.dec_ref(exc_id);
    info.exc_type.drop_with_heap(&mut runtime.heap);
    info.traceback.drop_with_heap(&mut runtime.heap);
    error_restore(&mut runtime, saved);
}

/// Builds a minimal compiled class exposing the given methods and returns
/// an instance of it.
fn instance_with_methods(runtime: &mut Runtime, methods: Vec<(&'static str, NativeFn)>) -> (HeapId, Value) {
    let template = TypeTemplate {
        name: "Delegatee",
        metaclass: Metaclass::Type,
        attrs: Vec::new(),
        instance_words: 0,
        vtable: Some(runtime.vtables.register(VTable::default())),
        slots: &[],
        methods,
    };
    let class = build_type_from_template(runtime, &template, &[], "tests").unwrap();
    let obj = instantiate(runtime, class).unwrap();
    (class, obj)
}

#[test]
fn yield_from_generator_exit_closes_and_propagates() {
    fn close(_: &mut Runtime, _: &[Value]) -> RunResult<Value> {
        Ok(Value::None)
    }
    let mut runtime = Runtime::new();
    let (class, obj) = instance_with_methods(&mut runtime, vec![("close", close as NativeFn)]);

    park(&mut runtime, ExcType::GeneratorExit, "");
    let outcome = yield_from_except(&mut runtime, &obj).unwrap();
    assert!(matches!(outcome, YieldFromResult::Propagate));
    assert!(error_pending(&runtime));
    clear_pending(&mut runtime);

    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);
}

#[test]
fn yield_from_generator_exit_tolerates_missing_close() {
    let mut runtime = Runtime::new();
    let (class, obj) = instance_with_methods(&mut runtime, Vec::new());

    park(&mut runtime, ExcType::GeneratorExit, "");
    let outcome = yield_from_except(&mut runtime, &obj).unwrap();
    assert!(matches!(outcome, YieldFromResult::Propagate));
    clear_pending(&mut runtime);

    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);
}

#[test]
fn yield_from_throw_can_continue_stop_or_propagate() {
    fn throw_continue(_: &mut Runtime, _: &[Value]) -> RunResult<Value> {
        Ok(Value::Bool(true))
    }
    fn throw_stop(_: &mut Runtime, _: &[Value]) -> RunResult<Value> {
        Err(RunError::Exc(SimpleException::new_msg(ExcType::StopIteration, "final")))
    }
    fn throw_fail(_: &mut Runtime, _: &[Value]) -> RunResult<Value> {
        Err(RunError::Exc(SimpleException::new_msg(ExcType::TypeError, "nope")))
    }

    let mut runtime = Runtime::new();

    let (class, obj) = instance_with_methods(&mut runtime, vec![("throw", throw_continue as NativeFn)]);
    park(&mut runtime, ExcType::ValueError, "v");
    let outcome = yield_from_except(&mut runtime, &obj).unwrap();
    let YieldFromResult::ContinueWith(v) = outcome else { unreachable!() };
    assert_eq!(v, Value::Bool(true));
    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);

    let (class, obj) = instance_with_methods(&mut runtime, vec![("throw", throw_stop as NativeFn)]);
    park(&mut runtime, ExcType::ValueError, "v");
    let outcome = yield_from_except(&mut runtime, &obj).unwrap();
    let YieldFromResult::StopWith(v) = outcome else { unreachable!() };
    assert_eq!(v.as_str(&runtime.heap), Some("final"));
    v.drop_with_heap(&mut runtime.heap);
    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);

    let (class, obj) = instance_with_methods(&mut runtime, vec![("throw", throw_fail as NativeFn)]);
    park(&mut runtime, ExcType::ValueError, "v");
    assert!(yield_from_except(&mut runtime, &obj).is_err());
    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);
}

#[test]
fn yield_from_without_throw_propagates_original() {
    let mut runtime = Runtime::new();
    let (class, obj) = instance_with_methods(&mut runtime, Vec::new());
    park(&mut runtime, ExcType::ValueError, "original");
    let outcome = yield_from_except(&mut runtime, &obj).unwrap();
    assert!(matches!(outcome, YieldFromResult::Propagate));
    let saved = error_catch(&mut runtime).unwrap();
    assert!(exc_matches(&runtime, ExcType::ValueError));
    error_restore(&mut runtime, saved);
    obj.drop_with_heap(&mut runtime.heap);
    runtime.heap.dec_ref(class);
}
