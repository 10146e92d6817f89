//! Class construction from compile-time templates.
//!
//! A compiled module carries one [`TypeTemplate`] per class. At load, the
//! builder turns each template plus its declared base list into a heap type
//! equivalent to what the `class` statement would have produced: base
//! normalization through `__mro_entries__`, metaclass resolution, C3
//! linearization, namespace population, `__orig_bases__` preservation, and
//! the `__init_subclass__` hook.

use std::rc::Rc;

use crate::{
    attrs::AttrDescriptor,
    exception::{ExcType, RunResult},
    function::{call_value, CompiledFunction, NativeFn},
    heap::{ChildIds, Heap, HeapData, HeapId},
    intern::StaticStr,
    runtime::Runtime,
    types::{
        class::{compute_c3_mro, effective_metaclass, namespace_set, type_lookup, Instance, Metaclass, TypeObject},
        Dict, Tuple,
    },
    value::Value,
    vtable::VTableId,
};

/// A parametrized generic appearing in a declared base list (`Base[T]`).
///
/// Its `__mro_entries__` hook rewrites it to its origin when the class
/// statement resolves bases, which is the only protocol the builder needs
/// from it.
#[derive(Debug)]
pub struct GenericAlias {
    origin: HeapId,
    args: Vec<Value>,
}

impl GenericAlias {
    /// Creates an alias. Takes ownership of the origin reference and the
    /// argument references.
    #[must_use]
    pub fn new(origin: HeapId, args: Vec<Value>) -> Self {
        Self { origin, args }
    }

    /// The unparametrized origin type.
    #[must_use]
    pub fn origin(&self) -> HeapId {
        self.origin
    }

    /// The type arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The `__mro_entries__` rewrite: the alias resolves to its origin.
    #[must_use]
    pub fn mro_entries(&self) -> HeapId {
        self.origin
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        out.push(self.origin);
        for arg in &self.args {
            if let Value::Ref(id) = arg {
                out.push(*id);
            }
        }
    }
}

/// Compile-time description of one class, emitted per compiled module.
#[derive(Debug)]
pub struct TypeTemplate {
    /// `__name__`.
    pub name: &'static str,
    /// The declared metaclass.
    pub metaclass: Metaclass,
    /// Native attribute layout.
    pub attrs: Vec<AttrDescriptor>,
    /// Instance storage size in words, bitmap words included.
    pub instance_words: usize,
    /// The class's dispatch table; absent for trait types.
    pub vtable: Option<VTableId>,
    /// The declared `__slots__`. Must be empty for compiled classes.
    pub slots: &'static [&'static str],
    /// Methods to install in the class namespace.
    pub methods: Vec<(&'static str, NativeFn)>,
}

/// Builds a heap type from a template and its declared bases.
///
/// `declared_bases` references are borrowed; the built class acquires its
/// own. Returns the new class with one reference for the caller.
pub fn build_type_from_template(
    runtime: &mut Runtime,
    template: &TypeTemplate,
    declared_bases: &[HeapId],
    module: &str,
) -> RunResult<HeapId> {
    if !template.slots.is_empty() {
        return Err(ExcType::type_error(format!(
            "class '{}' cannot have a non-empty __slots__ in compiled code",
            template.name
        )));
    }

    // Normalize the declared bases through __mro_entries__
    let mut rewritten = false;
    let mut working: Vec<HeapId> = Vec::with_capacity(declared_bases.len());
    for &base in declared_bases {
        match runtime.heap.get(base) {
            HeapData::GenericAlias(alias) => {
                working.push(alias.mro_entries());
                rewritten = true;
            }
            HeapData::Type(_) => working.push(base),
            other => {
                return Err(ExcType::type_error(format!(
                    "bases must be types, not {}",
                    other.type_name()
                )));
            }
        }
    }

    let metaclass = effective_metaclass(&runtime.heap, template.metaclass, &working)?;

    // A non-default metaclass gets a proxy class built through it first;
    // its resolved bases replace the working list and its namespace is
    // merged into the real class afterwards.
    let proxy = if metaclass == Metaclass::Type {
        None
    } else {
        let proxy_id = build_proxy(&mut runtime.heap, metaclass, &working)?;
        let HeapData::Type(proxy_ty) = runtime.heap.get(proxy_id) else {
            unreachable!();
        };
        working = proxy_ty.bases().to_vec();
        Some(proxy_id)
    };

    let mro_tail = match compute_c3_mro(&runtime.heap, &working) {
        Ok(mro) => mro,
        Err(err) => {
            if let Some(proxy_id) = proxy {
                runtime.heap.dec_ref(proxy_id);
            }
            return Err(err);
        }
    };

    // Populate the namespace from the template's method table
    let mut namespace = Dict::default();
    for &(name, native) in &template.methods {
        let func = CompiledFunction::new(
            native,
            name.to_owned(),
            format!("{}.{name}", template.name),
            module.to_owned(),
            None,
        );
        let func_id = runtime.heap.allocate(HeapData::Function(func));
        let key_id = runtime.interns.intern(&mut runtime.heap, name);
        runtime.heap.inc_ref(key_id);
        namespace.insert(&mut runtime.heap, Value::Ref(key_id), Value::Ref(func_id))?;
    }

    for &id in working.iter().chain(&mro_tail) {
        runtime.heap.inc_ref(id);
    }
    let class = runtime.heap.allocate(HeapData::Type(TypeObject::new(
        template.name.to_owned(),
        module.to_owned(),
        metaclass,
        working,
        mro_tail.clone(),
        namespace,
        template.vtable,
        Rc::from(template.attrs.clone()),
        template.instance_words,
        None,
    )));

    if let Some(proxy_id) = proxy {
        merge_proxy_namespace(runtime, class, proxy_id)?;
        runtime.heap.dec_ref(proxy_id);
    }

    if rewritten {
        let originals: Vec<Value> = declared_bases
            .iter()
            .map(|&b| {
                runtime.heap.inc_ref(b);
                Value::Ref(b)
            })
            .collect();
        let orig = runtime.heap.allocate(HeapData::Tuple(Tuple::from_values(originals)));
        let HeapData::Type(ty) = runtime.heap.get_mut(class) else {
            unreachable!();
        };
        ty.set_orig_bases(Some(orig));
    }

    run_init_subclass(runtime, class, &mro_tail)?;
    Ok(class)
}

/// Builds the intermediate proxy class through a non-default metaclass:
/// the normalized bases and an empty namespace, plus whatever the
/// metaclass itself contributes. The legacy `GenericMeta` stamps a
/// `_gorg` slot pointing at the class, which the builder later redirects
/// to the real one.
fn build_proxy(heap: &mut Heap, metaclass: Metaclass, bases: &[HeapId]) -> RunResult<HeapId> {
    for &id in bases {
        heap.inc_ref(id);
    }
    let proxy = heap.allocate(HeapData::Type(TypeObject::new(
        "<proxy>".to_owned(),
        "builtins".to_owned(),
        metaclass,
        bases.to_vec(),
        Vec::new(),
        Dict::default(),
        None,
        Rc::from([]),
        0,
        None,
    )));
    if metaclass == Metaclass::GenericMeta {
        let key = Value::Ref(heap.allocate(HeapData::Str(StaticStr::Gorg.as_str().into())));
        heap.inc_ref(proxy);
        namespace_set(heap, proxy, key, Value::Ref(proxy))?;
    }
    Ok(proxy)
}

/// Copies the proxy's namespace into the real class and points `_gorg`
/// (when present) at the real class instead of the proxy.
fn merge_proxy_namespace(runtime: &mut Runtime, class: HeapId, proxy: HeapId) -> RunResult<()> {
    // Move the namespace out wholesale so the proxy's self-reference under
    // _gorg travels with it instead of keeping the proxy alive
    let namespace = runtime.heap.with_taken(proxy, |_, data| {
        let HeapData::Type(proxy_ty) = data else {
            unreachable!();
        };
        std::mem::take(proxy_ty.namespace_mut())
    });
    for (key, value) in namespace.into_entries() {
        let value = if key.as_str(&runtime.heap) == Some(StaticStr::Gorg.as_str()) {
            value.drop_with_heap(&mut runtime.heap);
            runtime.heap.inc_ref(class);
            Value::Ref(class)
        } else {
            value
        };
        namespace_set(&mut runtime.heap, class, key, value)?;
    }
    Ok(())
}

/// Invokes the nearest `__init_subclass__` up the MRO with the new class.
fn run_init_subclass(runtime: &mut Runtime, class: HeapId, mro_tail: &[HeapId]) -> RunResult<()> {
    for &ancestor in mro_tail {
        let Some(hook) = type_lookup(&runtime.heap, ancestor, StaticStr::InitSubclass.as_str()) else {
            continue;
        };
        runtime.heap.inc_ref(class);
        let arg = Value::Ref(class);
        let result = call_value(runtime, &hook, std::slice::from_ref(&arg));
        arg.drop_with_heap(&mut runtime.heap);
        hook.drop_with_heap(&mut runtime.heap);
        result?.drop_with_heap(&mut runtime.heap);
        return Ok(());
    }
    Ok(())
}

/// Allocates an instance of a built class with every attribute undefined.
///
/// This is the compiled allocator path; `__init__` is compiled code and
/// runs separately. Trait types carry no vtable and cannot be
/// instantiated.
pub fn instantiate(runtime: &mut Runtime, class: HeapId) -> RunResult<Value> {
    let HeapData::Type(ty) = runtime.heap.get(class) else {
        unreachable!("instantiate: not a type");
    };
    let Some(vtable) = ty.vtable() else {
        return Err(ExcType::type_error(format!(
            "cannot instantiate abstract trait type '{}'",
            ty.name()
        )));
    };
    let layout = Rc::clone(ty.attrs());
    let words = ty.instance_words();
    runtime.heap.inc_ref(class);
    let id = runtime
        .heap
        .allocate(HeapData::Instance(Instance::new(class, vtable, layout, words)));
    Ok(Value::Ref(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exception::RunError, vtable::VTable};

    fn plain_template(name: &'static str) -> TypeTemplate {
        TypeTemplate {
            name,
            metaclass: Metaclass::Type,
            attrs: Vec::new(),
            instance_words: 0,
            vtable: None,
            slots: &[],
            methods: Vec::new(),
        }
    }

    fn build_base(runtime: &mut Runtime, name: &'static str) -> HeapId {
        let template = plain_template(name);
        build_type_from_template(runtime, &template, &[], "tests").unwrap()
    }

    #[test]
    fn slots_are_rejected() {
        let mut runtime = Runtime::new();
        let mut template = plain_template("Slotted");
        template.slots = &["x", "y"];
        let err = build_type_from_template(&mut runtime, &template, &[], "tests").unwrap_err();
        let RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(exc.exc_type(), ExcType::TypeError);
        assert!(exc.message().unwrap().contains("__slots__"));
    }

    #[test]
    fn generic_base_is_rewritten_and_preserved() {
        let mut runtime = Runtime::new();
        let generic = build_base(&mut runtime, "Generic");
        runtime.heap.inc_ref(generic);
        let t_param = Value::Ref(runtime.heap.allocate(HeapData::Str("T".into())));
        let alias = runtime
            .heap
            .allocate(HeapData::GenericAlias(GenericAlias::new(generic, vec![t_param])));

        let template = plain_template("Box");
        let class = build_type_from_template(&mut runtime, &template, &[alias], "tests").unwrap();

        let HeapData::Type(ty) = runtime.heap.get(class) else { unreachable!() };
        // The MRO holds the rewritten origin, not the alias
        assert_eq!(ty.bases(), &[generic]);
        assert_eq!(ty.mro_tail(), &[generic]);
        // __orig_bases__ preserves the as-declared tuple
        let orig = ty.orig_bases().unwrap();
        let HeapData::Tuple(orig_tuple) = runtime.heap.get(orig) else { unreachable!() };
        assert_eq!(orig_tuple.as_slice(), &[Value::Ref(alias)]);

        runtime.heap.dec_ref(class);
        runtime.heap.dec_ref(alias);
        runtime.heap.dec_ref(generic);
    }

    #[test]
    fn unrewritten_class_has_no_orig_bases() {
        let mut runtime = Runtime::new();
        let base = build_base(&mut runtime, "Base");
        let template = plain_template("Child");
        let class = build_type_from_template(&mut runtime, &template, &[base], "tests").unwrap();
        let HeapData::Type(ty) = runtime.heap.get(class) else { unreachable!() };
        assert_eq!(ty.orig_bases(), None);
        runtime.heap.dec_ref(class);
        runtime.heap.dec_ref(base);
    }

    #[test]
    fn metaclass_proxy_merges_gorg() {
        let mut runtime = Runtime::new();
        let mut base_template = plain_template("GenericRoot");
        base_template.metaclass = Metaclass::GenericMeta;
        let base = build_type_from_template(&mut runtime, &base_template, &[], "tests").unwrap();

        let template = plain_template("Concrete");
        let class = build_type_from_template(&mut runtime, &template, &[base], "tests").unwrap();
        let HeapData::Type(ty) = runtime.heap.get(class) else { unreachable!() };
        assert_eq!(ty.metaclass(), Metaclass::GenericMeta);
        // _gorg points at the real class, not the construction proxy
        let gorg = type_lookup(&runtime.heap, class, "_gorg").unwrap();
        assert_eq!(gorg, Value::Ref(class));
        gorg.drop_with_heap(&mut runtime.heap);
        runtime.heap.dec_ref(class);
        runtime.heap.dec_ref(base);
    }

    #[test]
    fn init_subclass_hook_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn hook(_: &mut Runtime, args: &[Value]) -> RunResult<Value> {
            assert_eq!(args.len(), 1);
            CALLS.fetch_add(1, Ordering::Relaxed);
            Ok(Value::None)
        }

        let mut runtime = Runtime::new();
        let mut base_template = plain_template("Hooked");
        base_template.methods = vec![("__init_subclass__", hook as NativeFn)];
        let base = build_type_from_template(&mut runtime, &base_template, &[], "tests").unwrap();
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);

        let template = plain_template("Child");
        let class = build_type_from_template(&mut runtime, &template, &[base], "tests").unwrap();
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        runtime.heap.dec_ref(class);
        runtime.heap.dec_ref(base);
    }

    #[test]
    fn instance_of_built_class_passes_isinstance() {
        let mut runtime = Runtime::new();
        let base = build_base(&mut runtime, "Base");
        let unrelated = build_base(&mut runtime, "Unrelated");

        let mut template = plain_template("Widget");
        template.vtable = Some(runtime.vtables.register(VTable::default()));
        let class = build_type_from_template(&mut runtime, &template, &[base], "tests").unwrap();

        let obj = instantiate(&mut runtime, class).unwrap();
        assert!(crate::types::class::isinstance(&runtime.heap, &runtime.vtables, &obj, class));
        assert!(crate::types::class::isinstance(&runtime.heap, &runtime.vtables, &obj, base));
        assert!(!crate::types::class::isinstance(
            &runtime.heap,
            &runtime.vtables,
            &obj,
            unrelated
        ));

        obj.drop_with_heap(&mut runtime.heap);
        runtime.heap.dec_ref(class);
        runtime.heap.dec_ref(unrelated);
        runtime.heap.dec_ref(base);
    }
}
