//! The error bridge between the two error models.
//!
//! Runtime primitives report failure as `RunResult`. Compiled code works
//! the other way around: a sentinel return plus a pending error parked on
//! the thread state. This module owns the thread state and the
//! translations: parking an error, catching into a stable sys-exc-info
//! view, restoring, re-raising, stitching synthetic traceback frames, and
//! the three-outcome `yield from` error dispatch.

use crate::{
    exception::{ExcInstance, ExcType, RunError, RunResult, SimpleException},
    function::{call_method, CodeObject, FrameObject, TracebackEntry},
    heap::{Heap, HeapData, HeapId},
    runtime::Runtime,
    value::Value,
};

/// A parked error: either the cheap form runtime primitives raise, or an
/// already-materialized exception object (one owned reference).
#[derive(Debug)]
pub enum PendingError {
    /// Type plus message, not yet a heap object.
    Simple(SimpleException),
    /// A heap exception instance.
    Object(HeapId),
}

/// The `(type, value, traceback)` record of sys-exc-info.
///
/// Slots are never conceptually empty: the dummy singleton stands in for
/// absence so reference handling stays uniform. Each slot owns its
/// reference.
#[derive(Debug)]
pub struct ErrorTriple {
    /// The exception type, or the dummy.
    pub exc_type: Value,
    /// The exception instance, or the dummy.
    pub value: Value,
    /// The traceback chain head, or the dummy.
    pub traceback: Value,
}

impl ErrorTriple {
    /// A triple of three dummy slots.
    #[must_use]
    pub fn empty(heap: &Heap, dummy: HeapId) -> Self {
        let slot = || {
            heap.inc_ref(dummy);
            Value::Ref(dummy)
        };
        Self {
            exc_type: slot(),
            value: slot(),
            traceback: slot(),
        }
    }

    /// Clones the triple, acquiring a reference per slot.
    #[must_use]
    pub fn clone_ref(&self, heap: &Heap) -> Self {
        Self {
            exc_type: self.exc_type.clone_ref(heap),
            value: self.value.clone_ref(heap),
            traceback: self.traceback.clone_ref(heap),
        }
    }

    /// Releases all three slot references.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        self.exc_type.drop_with_heap(heap);
        self.value.drop_with_heap(heap);
        self.traceback.drop_with_heap(heap);
    }
}

/// Per-thread error state: the pending error indicator and the current
/// sys-exc-info view.
#[derive(Debug)]
pub struct ThreadState {
    pending: Option<PendingError>,
    exc_info: ErrorTriple,
}

impl ThreadState {
    /// Creates a thread state with no pending error and a dummy exc-info.
    #[must_use]
    pub fn new(heap: &Heap, dummy: HeapId) -> Self {
        Self {
            pending: None,
            exc_info: ErrorTriple::empty(heap, dummy),
        }
    }
}

/// Parks an error on the thread state.
///
/// A `Fatal` error is the out-of-memory abort path; it never becomes a
/// Python exception.
///
/// # Panics
/// Panics on [`RunError::Fatal`].
pub fn set_pending(runtime: &mut Runtime, err: RunError) {
    match err {
        RunError::Exc(exc) => {
            clear_pending(runtime);
            runtime.thread.pending = Some(PendingError::Simple(exc));
        }
        RunError::Fatal(msg) => panic!("fatal runtime error: {msg}"),
    }
}

/// Parks an already-materialized exception object. Steals the reference.
pub fn set_pending_object(runtime: &mut Runtime, exc: HeapId) {
    clear_pending(runtime);
    runtime.thread.pending = Some(PendingError::Object(exc));
}

/// True when an error is parked on the thread.
#[must_use]
pub fn error_pending(runtime: &Runtime) -> bool {
    runtime.thread.pending.is_some()
}

/// Clears the error indicator, releasing any materialized reference.
pub fn clear_pending(runtime: &mut Runtime) {
    if let Some(PendingError::Object(id)) = runtime.thread.pending.take() {
        runtime.heap.dec_ref(id);
    }
}

/// Takes the pending error as a materialized exception object. The caller
/// owns the returned reference.
fn take_pending_object(runtime: &mut Runtime) -> Option<HeapId> {
    match runtime.thread.pending.take()? {
        PendingError::Object(id) => Some(id),
        PendingError::Simple(exc) => {
            let inst = ExcInstance::from_simple(&exc, &mut runtime.heap);
            Some(runtime.heap.allocate(HeapData::Exception(inst)))
        }
    }
}

/// Builds the sys-exc-info triple for a materialized exception. Steals the
/// exception reference; acquires one for the traceback slot.
fn triple_for(runtime: &mut Runtime, exc: HeapId) -> ErrorTriple {
    let HeapData::Exception(inst) = runtime.heap.get(exc) else {
        unreachable!("pending error is not an exception");
    };
    let exc_type = Value::ExcType(inst.exc_type());
    let traceback = match inst.traceback() {
        Some(tb) => {
            runtime.heap.inc_ref(tb);
            Value::Ref(tb)
        }
        None => {
            runtime.heap.inc_ref(runtime.dummy_exc);
            Value::Ref(runtime.dummy_exc)
        }
    };
    ErrorTriple {
        exc_type,
        value: Value::Ref(exc),
        traceback,
    }
}

/// Enters an `except` region.
///
/// Snapshots the current sys-exc-info, normalizes the pending error,
/// installs it as the new sys-exc-info, and clears the indicator. The
/// returned snapshot is handed back to [`error_restore`] when the region
/// is left. Calling with no pending error is a programming error in the
/// compiled code and raises `RuntimeError`.
pub fn error_catch(runtime: &mut Runtime) -> RunResult<ErrorTriple> {
    let Some(exc) = take_pending_object(runtime) else {
        return Err(ExcType::runtime_error("error_catch called with no error set"));
    };
    let new_info = triple_for(runtime, exc);
    let snapshot = std::mem::replace(&mut runtime.thread.exc_info, new_info);
    Ok(snapshot)
}

/// Leaves an `except` region: reinstalls the saved sys-exc-info, consuming
/// its references and releasing the region's own.
pub fn error_restore(runtime: &mut Runtime, saved: ErrorTriple) {
    let region = std::mem::replace(&mut runtime.thread.exc_info, saved);
    region.drop_with_heap(&mut runtime.heap);
}

/// A stable view of the current sys-exc-info, one fresh reference per slot.
#[must_use]
pub fn exc_info(runtime: &Runtime) -> ErrorTriple {
    runtime.thread.exc_info.clone_ref(&runtime.heap)
}

/// `raise x`: a bare type is instantiated with no args; an instance is
/// raised as-is. Steals the argument's reference.
pub fn raise(runtime: &mut Runtime, exc: Value) -> RunResult<()> {
    match exc {
        Value::ExcType(exc_type) => {
            let id = runtime.heap.allocate(HeapData::Exception(ExcInstance::new(exc_type, vec![])));
            set_pending_object(runtime, id);
            Ok(())
        }
        Value::Ref(id) if matches!(runtime.heap.get(id), HeapData::Exception(_)) => {
            set_pending_object(runtime, id);
            Ok(())
        }
        other => {
            let err = ExcType::type_error("exceptions must derive from BaseException");
            other.drop_with_heap(&mut runtime.heap);
            Err(err)
        }
    }
}

/// Bare `raise`: reinstalls the current sys-exc-info as the pending error.
pub fn reraise(runtime: &mut Runtime) -> RunResult<()> {
    let value = &runtime.thread.exc_info.value;
    let Value::Ref(id) = value else {
        return Err(ExcType::runtime_error("No active exception to reraise"));
    };
    let id = *id;
    if !matches!(runtime.heap.get(id), HeapData::Exception(_)) {
        // Dummy slot: nothing is being handled
        return Err(ExcType::runtime_error("No active exception to reraise"));
    }
    runtime.heap.inc_ref(id);
    set_pending_object(runtime, id);
    Ok(())
}

/// `except SomeError:` matching against the current sys-exc-info type.
#[must_use]
pub fn exc_matches(runtime: &Runtime, candidate: ExcType) -> bool {
    match runtime.thread.exc_info.exc_type {
        Value::ExcType(current) => current.is_subclass_of(candidate),
        _ => false,
    }
}

/// Stitches a synthetic frame for `(file, function, line)` onto the pending
/// exception's traceback chain.
///
/// The pending error is taken off the thread before the code and frame
/// objects are built and reinstalled after, so allocation during stitching
/// never observes a half-set indicator.
pub fn add_traceback(runtime: &mut Runtime, filename: &str, funcname: &str, line: u32) {
    let Some(exc) = take_pending_object(runtime) else {
        return;
    };
    let code = runtime.heap.allocate(HeapData::Code(CodeObject {
        filename: filename.to_owned(),
        name: funcname.to_owned(),
        firstlineno: line,
    }));
    let frame = runtime.heap.allocate(HeapData::Frame(FrameObject::new(code, line)));

    let HeapData::Exception(inst) = runtime.heap.get_mut(exc) else {
        unreachable!();
    };
    let old_head = inst.set_traceback(None);
    let link = runtime
        .heap
        .allocate(HeapData::Traceback(TracebackEntry::new(frame, line, old_head)));
    let HeapData::Exception(inst) = runtime.heap.get_mut(exc) else {
        unreachable!();
    };
    inst.set_traceback(Some(link));

    set_pending_object(runtime, exc);
}

/// Outcome of resuming a `yield from` delegation with an exception.
#[derive(Debug)]
pub enum YieldFromResult {
    /// The delegatee handled the throw and yielded another value.
    ContinueWith(Value),
    /// The delegatee finished; this is its return value.
    StopWith(Value),
    /// The exception propagates; it is back on the thread state.
    Propagate,
}

/// Dispatches an exception thrown into a delegating generator.
///
/// `GeneratorExit` closes the delegatee (absence of `close` is ignored)
/// and propagates. Anything else is thrown into the delegatee: a normal
/// return continues the loop, `StopIteration` ends the delegation with its
/// carried value, and any other error propagates.
pub fn yield_from_except(runtime: &mut Runtime, generator: &Value) -> RunResult<YieldFromResult> {
    let Some(exc) = take_pending_object(runtime) else {
        return Err(ExcType::runtime_error("yield from dispatch with no error set"));
    };
    let HeapData::Exception(inst) = runtime.heap.get(exc) else {
        unreachable!();
    };
    let exc_type = inst.exc_type();

    if exc_type.is_subclass_of(ExcType::GeneratorExit) {
        match call_method(runtime, generator, "close", &[]) {
            Ok(result) => result.drop_with_heap(&mut runtime.heap),
            Err(RunError::Exc(e)) if e.exc_type() == ExcType::AttributeError => {}
            Err(other) => {
                runtime.heap.dec_ref(exc);
                return Err(other);
            }
        }
        set_pending_object(runtime, exc);
        return Ok(YieldFromResult::Propagate);
    }

    let exc_value = Value::Ref(exc);
    let throw_args = [Value::ExcType(exc_type), exc_value.clone_ref(&runtime.heap)];
    let outcome = call_method(runtime, generator, "throw", &throw_args);
    for arg in throw_args {
        arg.drop_with_heap(&mut runtime.heap);
    }
    match outcome {
        Ok(value) => {
            exc_value.drop_with_heap(&mut runtime.heap);
            Ok(YieldFromResult::ContinueWith(value))
        }
        Err(RunError::Exc(e)) if e.exc_type() == ExcType::StopIteration => {
            exc_value.drop_with_heap(&mut runtime.heap);
            // The generator's return value travels as StopIteration's arg
            let value = match e.message() {
                Some(msg) => Value::Ref(runtime.heap.allocate(HeapData::Str(msg.into()))),
                None => Value::None,
            };
            Ok(YieldFromResult::StopWith(value))
        }
        Err(RunError::Exc(e)) if e.exc_type() == ExcType::AttributeError => {
            // No throw method: the original exception propagates
            let Value::Ref(id) = exc_value else { unreachable!() };
            set_pending_object(runtime, id);
            Ok(YieldFromResult::Propagate)
        }
        Err(other) => {
            exc_value.drop_with_heap(&mut runtime.heap);
            Err(other)
        }
    }
}
