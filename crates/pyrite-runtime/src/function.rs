//! Compiled function objects, bound methods, and the synthetic code, frame,
//! and traceback records used to stitch compiled frames into Python-visible
//! tracebacks.

use crate::{
    exception::{ExcType, RunResult},
    heap::{ChildIds, Heap, HeapData, HeapId},
    runtime::Runtime,
    types::class::type_lookup,
    value::Value,
};

/// The native entry point of a compiled function: `(runtime, args)`.
/// Args are borrowed; the function clones what it keeps.
pub type NativeFn = fn(&mut Runtime, &[Value]) -> RunResult<Value>;

/// A compiled function object.
///
/// Wraps the native entry point with the metadata Python-level code can
/// see. `__defaults__`, `__kwdefaults__`, and `__annotations__` are all
/// reported as `None`: compiled code does not preserve them.
#[derive(Debug)]
pub struct CompiledFunction {
    native: NativeFn,
    name: String,
    qualname: String,
    module: String,
    code: Option<HeapId>,
}

impl CompiledFunction {
    /// Creates a function object. Takes ownership of the `code` reference.
    #[must_use]
    pub fn new(native: NativeFn, name: String, qualname: String, module: String, code: Option<HeapId>) -> Self {
        Self {
            native,
            name,
            qualname,
            module,
            code,
        }
    }

    /// The native entry point.
    #[must_use]
    pub fn native(&self) -> NativeFn {
        self.native
    }

    /// `__name__`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `__qualname__`.
    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// `__name__` is writable; a non-string is rejected with the host's
    /// wording.
    pub fn set_name(&mut self, heap: &Heap, value: &Value) -> RunResult<()> {
        let Some(name) = value.as_str(heap) else {
            return Err(ExcType::type_error("__name__ must be set to a string object"));
        };
        self.name = name.to_owned();
        Ok(())
    }

    /// Reads an introspection attribute by name.
    ///
    /// Returns `None` when the attribute is not one the function exposes.
    pub fn introspection_attr(&self, heap: &mut Heap, name: &str) -> Option<Value> {
        match name {
            // Not preserved by compilation
            "__defaults__" | "__kwdefaults__" | "__annotations__" => Some(Value::None),
            "__name__" => Some(Value::Ref(heap.allocate(HeapData::Str(self.name.as_str().into())))),
            "__qualname__" => Some(Value::Ref(heap.allocate(HeapData::Str(self.qualname.as_str().into())))),
            "__module__" => Some(Value::Ref(heap.allocate(HeapData::Str(self.module.as_str().into())))),
            "__code__" => Some(self.code.map_or(Value::None, |id| {
                heap.inc_ref(id);
                Value::Ref(id)
            })),
            _ => None,
        }
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        if let Some(code) = self.code {
            out.push(code);
        }
    }
}

/// A compiled function bound to an instance by the descriptor protocol.
#[derive(Debug)]
pub struct BoundMethod {
    func: HeapId,
    instance: HeapId,
}

impl BoundMethod {
    /// Binds `func` to `instance`. Takes ownership of both references.
    #[must_use]
    pub fn new(func: HeapId, instance: HeapId) -> Self {
        Self { func, instance }
    }

    /// The underlying function.
    #[must_use]
    pub fn func(&self) -> HeapId {
        self.func
    }

    /// `__self__`.
    #[must_use]
    pub fn instance(&self) -> HeapId {
        self.instance
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.push(self.func);
        out.push(self.instance);
    }
}

/// Descriptor-protocol bind: accessing a function through an instance
/// produces a bound method. Acquires references to both.
#[must_use]
pub fn bind_method(heap: &mut Heap, func: HeapId, instance: HeapId) -> Value {
    heap.inc_ref(func);
    heap.inc_ref(instance);
    Value::Ref(heap.allocate(HeapData::BoundMethod(BoundMethod::new(func, instance))))
}

/// A synthetic code object carrying just what a traceback needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeObject {
    /// `co_filename`.
    pub filename: String,
    /// `co_name`.
    pub name: String,
    /// `co_firstlineno`.
    pub firstlineno: u32,
}

/// A synthetic frame referencing its code object.
#[derive(Debug)]
pub struct FrameObject {
    code: HeapId,
    lineno: u32,
}

impl FrameObject {
    /// Creates a frame. Takes ownership of the `code` reference.
    #[must_use]
    pub fn new(code: HeapId, lineno: u32) -> Self {
        Self { code, lineno }
    }

    /// The frame's code object.
    #[must_use]
    pub fn code(&self) -> HeapId {
        self.code
    }

    /// The current line.
    #[must_use]
    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.push(self.code);
    }
}

/// One link of a traceback chain, innermost first.
#[derive(Debug)]
pub struct TracebackEntry {
    frame: HeapId,
    lineno: u32,
    next: Option<HeapId>,
}

impl TracebackEntry {
    /// Creates a link. Takes ownership of the `frame` and `next` references.
    #[must_use]
    pub fn new(frame: HeapId, lineno: u32, next: Option<HeapId>) -> Self {
        Self { frame, lineno, next }
    }

    /// The frame this link points at.
    #[must_use]
    pub fn frame(&self) -> HeapId {
        self.frame
    }

    /// The line within the frame.
    #[must_use]
    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    /// The enclosing link, if any.
    #[must_use]
    pub fn next(&self) -> Option<HeapId> {
        self.next
    }

    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.push(self.frame);
        if let Some(next) = self.next {
            out.push(next);
        }
    }
}

/// Calls a callable value with positional args.
///
/// Supported callables: compiled functions, bound methods (which prepend
/// their instance), and builtin exception types (which materialize an
/// exception instance, the way `raise SomeError` instantiates a bare type).
pub fn call_value(runtime: &mut Runtime, callable: &Value, args: &[Value]) -> RunResult<Value> {
    match callable {
        Value::ExcType(exc_type) => {
            let exc_type = *exc_type;
            let owned: Vec<Value> = args.iter().map(|a| a.clone_ref(&runtime.heap)).collect();
            let id = runtime
                .heap
                .allocate(HeapData::Exception(crate::exception::ExcInstance::new(exc_type, owned)));
            Ok(Value::Ref(id))
        }
        Value::Ref(id) => match runtime.heap.get(*id) {
            HeapData::Function(func) => {
                let native = func.native();
                native(runtime, args)
            }
            HeapData::BoundMethod(bm) => {
                let func = bm.func();
                let instance = bm.instance();
                let HeapData::Function(func_obj) = runtime.heap.get(func) else {
                    unreachable!("bound method over a non-function");
                };
                let native = func_obj.native();
                runtime.heap.inc_ref(instance);
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(Value::Ref(instance));
                for arg in args {
                    full_args.push(arg.clone_ref(&runtime.heap));
                }
                let result = native(runtime, &full_args);
                for arg in full_args {
                    arg.drop_with_heap(&mut runtime.heap);
                }
                result
            }
            other => Err(ExcType::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        },
        other => Err(ExcType::type_error(format!(
            "'{}' object is not callable",
            other.type_name(&runtime.heap)
        ))),
    }
}

/// Calls `obj.name(args…)`: resolves `name` through the instance's class
/// MRO and invokes it with the instance prepended.
///
/// Raises `AttributeError` with the host's wording when the method is
/// absent.
pub fn call_method(runtime: &mut Runtime, obj: &Value, name: &str, args: &[Value]) -> RunResult<Value> {
    let Value::Ref(id) = obj else {
        return Err(ExcType::attribute_error(obj.type_name(&runtime.heap), name));
    };
    let HeapData::Instance(inst) = runtime.heap.get(*id) else {
        return Err(ExcType::attribute_error(runtime.heap.get(*id).type_name(), name));
    };
    let class = inst.class();
    let Some(resolved) = type_lookup(&runtime.heap, class, name) else {
        let HeapData::Type(ty) = runtime.heap.get(class) else {
            unreachable!();
        };
        return Err(ExcType::attribute_error(ty.name(), name));
    };
    let bound = match &resolved {
        Value::Ref(func_id) if matches!(runtime.heap.get(*func_id), HeapData::Function(_)) => {
            let bound = bind_method(&mut runtime.heap, *func_id, *id);
            resolved.drop_with_heap(&mut runtime.heap);
            bound
        }
        _ => resolved,
    };
    let result = call_value(runtime, &bound, args);
    bound.drop_with_heap(&mut runtime.heap);
    result
}
