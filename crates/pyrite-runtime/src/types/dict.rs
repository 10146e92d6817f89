//! Insertion-ordered dict: a hash table of indices over a dense entry list,
//! plus the exact-dict primitives compiled code calls and the offset-based
//! iteration protocol with its size guard.

use hashbrown::HashTable;

use crate::{
    exception::{ExcType, RunError, RunResult},
    function::call_method,
    heap::{ChildIds, Heap, HeapData, HeapId},
    intern::StaticStr,
    runtime::Runtime,
    value::Value,
};

/// One key/value slot. The cached hash avoids rehashing on table growth and
/// lets lookups skip deep equality on mismatched hashes.
#[derive(Debug)]
struct DictEntry {
    hash: u64,
    key: Value,
    value: Value,
}

/// Insertion-ordered mapping. Owns one reference per stored `Ref` key or
/// value.
///
/// `indices` maps a key hash to a position in `entries`; `entries` is dense
/// and in insertion order, so iteration is a plain walk of the vector.
/// Deletion compacts `entries` and shifts the stored indices down, keeping
/// iteration offsets meaningful.
#[derive(Debug, Default)]
pub struct Dict {
    indices: HashTable<usize>,
    entries: Vec<DictEntry>,
}

impl Dict {
    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the dict holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry position for `key`, comparing hash first and full
    /// equality only on hash hits.
    fn find(&self, heap: &Heap, hash: u64, key: &Value) -> Option<usize> {
        self.indices
            .find(hash, |&i| self.entries[i].hash == hash && self.entries[i].key.py_eq(key, heap))
            .copied()
    }

    /// Appends a new entry, taking ownership of both references. The key
    /// must not already be present.
    fn insert_new(&mut self, hash: u64, key: Value, value: Value) {
        let pos = self.entries.len();
        self.entries.push(DictEntry { hash, key, value });
        let entries = &self.entries;
        self.indices.insert_unique(hash, pos, |&i| entries[i].hash);
    }

    /// Removes the entry at `pos`, compacting the dense list and shifting
    /// the table's stored indices. Returns the entry's key and value; the
    /// caller owns both references.
    fn remove_at(&mut self, pos: usize) -> (Value, Value) {
        let hash = self.entries[pos].hash;
        match self.indices.find_entry(hash, |&i| i == pos) {
            Ok(occupied) => {
                occupied.remove();
            }
            Err(_) => unreachable!("index table out of sync with entries"),
        }
        let entry = self.entries.remove(pos);
        for slot in self.indices.iter_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        (entry.key, entry.value)
    }

    /// Inserts or overwrites in a dict detached from the arena (a type
    /// namespace, or one taken out via `with_taken`). Steals both
    /// references. Overwriting keeps the original key object and slot.
    pub fn insert(&mut self, heap: &mut Heap, key: Value, value: Value) -> RunResult<()> {
        let Some(hash) = key.py_hash(heap) else {
            let err = unhashable(heap, &key);
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            return Err(err);
        };
        match self.find(heap, hash, &key) {
            Some(pos) => {
                key.drop_with_heap(heap);
                let old = std::mem::replace(&mut self.entries[pos].value, value);
                old.drop_with_heap(heap);
            }
            None => self.insert_new(hash, key, value),
        }
        Ok(())
    }

    /// Looks a key up in a detached dict, borrowing the stored value.
    #[must_use]
    pub fn lookup<'a>(&'a self, heap: &Heap, key: &Value) -> Option<&'a Value> {
        let hash = key.py_hash(heap)?;
        self.find(heap, hash, key).map(|pos| &self.entries[pos].value)
    }

    /// Iterates over the entries in insertion order, borrowing keys and
    /// values.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|e| (&e.key, &e.value))
    }

    /// Consumes the dict, yielding owned key/value pairs in insertion
    /// order. The caller takes over every reference.
    pub fn into_entries(self) -> impl Iterator<Item = (Value, Value)> {
        self.entries.into_iter().map(|e| (e.key, e.value))
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        for entry in &self.entries {
            if let Value::Ref(id) = &entry.key {
                out.push(*id);
            }
            if let Value::Ref(id) = &entry.value {
                out.push(*id);
            }
        }
    }
}

fn unhashable(heap: &Heap, key: &Value) -> RunError {
    ExcType::type_error(format!("unhashable type: '{}'", key.type_name(heap)))
}

/// `d[key] = value`, exact-dict path. Steals both references.
///
/// Overwriting an existing key keeps the original key object and insertion
/// position and releases the displaced value.
pub fn dict_set_item(heap: &mut Heap, dict: HeapId, key: Value, value: Value) -> RunResult<()> {
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_set_item: not a dict");
        };
        d.insert(heap, key, value)
    })
}

/// `d.get(key)` / `d[key]` lookup, exact-dict path. Returns a fresh
/// reference to the value, or `None` when the key is absent. The caller
/// turns absence into `KeyError` or a default as its call site requires.
pub fn dict_get(heap: &mut Heap, dict: HeapId, key: &Value) -> RunResult<Option<Value>> {
    let Some(hash) = key.py_hash(heap) else {
        return Err(unhashable(heap, key));
    };
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_get: not a dict");
        };
        Ok(d.find(heap, hash, key).map(|pos| d.entries[pos].value.clone_ref(heap)))
    })
}

/// `key in d`, exact-dict path.
pub fn dict_contains(heap: &mut Heap, dict: HeapId, key: &Value) -> RunResult<bool> {
    let Some(hash) = key.py_hash(heap) else {
        return Err(unhashable(heap, key));
    };
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_contains: not a dict");
        };
        Ok(d.find(heap, hash, key).is_some())
    })
}

/// `d.pop(key)`, exact-dict path. Returns the removed value (caller owns the
/// reference), or `None` when the key was absent.
pub fn dict_pop(heap: &mut Heap, dict: HeapId, key: &Value) -> RunResult<Option<Value>> {
    let Some(hash) = key.py_hash(heap) else {
        return Err(unhashable(heap, key));
    };
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_pop: not a dict");
        };
        match d.find(heap, hash, key) {
            Some(pos) => {
                let (old_key, value) = d.remove_at(pos);
                old_key.drop_with_heap(heap);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    })
}

/// `d.setdefault(key, default)`, exact-dict path. Steals both references
/// and returns a fresh reference to the value now present under `key`.
pub fn dict_setdefault(heap: &mut Heap, dict: HeapId, key: Value, default: Value) -> RunResult<Value> {
    let Some(hash) = key.py_hash(heap) else {
        let err = unhashable(heap, &key);
        key.drop_with_heap(heap);
        default.drop_with_heap(heap);
        return Err(err);
    };
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_setdefault: not a dict");
        };
        match d.find(heap, hash, &key) {
            Some(pos) => {
                key.drop_with_heap(heap);
                default.drop_with_heap(heap);
                Ok(d.entries[pos].value.clone_ref(heap))
            }
            None => {
                let result = default.clone_ref(heap);
                d.insert_new(hash, key, default);
                Ok(result)
            }
        }
    })
}

/// How an update treats keys already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// `d.update(other)` / `**other` merges: every key from `other` lands,
    /// overwriting existing values.
    Overwrite,
    /// Display-style build (`{**a, **b}` argument checking in the compiler's
    /// keyword-merge path): a duplicate key is an error.
    ErrorOnDuplicate,
}

/// `d.update(other)` where `other` is itself an exact dict.
///
/// Walks `other` in insertion order. Under [`UpdateMode::ErrorOnDuplicate`]
/// a key already in `d` raises `TypeError` naming the key, matching the
/// host's duplicate-keyword wording.
pub fn dict_update(heap: &mut Heap, dict: HeapId, other: HeapId, mode: UpdateMode) -> RunResult<()> {
    let len = heap.with_taken(other, |_, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_update: source not a dict");
        };
        d.len()
    });
    for pos in 0..len {
        let (key, value) = heap.with_taken(other, |heap, data| {
            let HeapData::Dict(d) = data else { unreachable!() };
            let entry = &d.entries[pos];
            (entry.key.clone_ref(heap), entry.value.clone_ref(heap))
        });
        if mode == UpdateMode::ErrorOnDuplicate && dict_contains(heap, dict, &key)? {
            let name = key.as_str(heap).map_or_else(|| "?".to_owned(), str::to_owned);
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            return Err(ExcType::type_error(format!(
                "got multiple values for keyword argument '{name}'"
            )));
        }
        dict_set_item(heap, dict, key, value)?;
    }
    Ok(())
}

/// `obj[key]` discriminating on exact type: an exact dict uses the direct
/// primitive; a dict subclass goes through its `__getitem__` override, so
/// behavior like `defaultdict`'s miss handling is preserved. A `KeyError`
/// from the override maps back to absence.
pub fn mapping_get(runtime: &mut Runtime, obj: &Value, key: &Value) -> RunResult<Option<Value>> {
    if let Value::Ref(id) = obj
        && matches!(runtime.heap.get(*id), HeapData::Dict(_))
    {
        return dict_get(&mut runtime.heap, *id, key);
    }
    match call_method(runtime, obj, "__getitem__", std::slice::from_ref(key)) {
        Ok(value) => Ok(Some(value)),
        Err(RunError::Exc(e)) if e.exc_type() == ExcType::KeyError => Ok(None),
        Err(other) => Err(other),
    }
}

/// `obj[key] = value` discriminating on exact type, mirroring
/// [`mapping_get`]. Steals both references.
pub fn mapping_set(runtime: &mut Runtime, obj: &Value, key: Value, value: Value) -> RunResult<()> {
    if let Value::Ref(id) = obj
        && matches!(runtime.heap.get(*id), HeapData::Dict(_))
    {
        return dict_set_item(&mut runtime.heap, *id, key, value);
    }
    let args = [key, value];
    let result = call_method(runtime, obj, "__setitem__", &args);
    for arg in args {
        arg.drop_with_heap(&mut runtime.heap);
    }
    result?.drop_with_heap(&mut runtime.heap);
    Ok(())
}

/// `d.update(other)`, keys-protocol flavor: an exact dict merges directly;
/// anything else is asked for `keys()` and indexed per key.
pub fn dict_update_mapping(runtime: &mut Runtime, dict: HeapId, other: &Value) -> RunResult<()> {
    if let Value::Ref(id) = other
        && matches!(runtime.heap.get(*id), HeapData::Dict(_))
    {
        return dict_update(&mut runtime.heap, dict, *id, UpdateMode::Overwrite);
    }
    let keys = call_method(runtime, other, StaticStr::Keys.as_str(), &[])?;
    let snapshot: Vec<Value> = match &keys {
        Value::Ref(id) => match runtime.heap.get(*id) {
            HeapData::List(items) => items.as_slice().iter().map(|v| v.clone_ref(&runtime.heap)).collect(),
            HeapData::Tuple(items) => items.as_slice().iter().map(|v| v.clone_ref(&runtime.heap)).collect(),
            other => {
                let err = ExcType::type_error(format!("'{}' object is not iterable", other.type_name()));
                keys.drop_with_heap(&mut runtime.heap);
                return Err(err);
            }
        },
        other => {
            let err = ExcType::type_error(format!("'{}' object is not iterable", other.type_name(&runtime.heap)));
            return Err(err);
        }
    };
    keys.drop_with_heap(&mut runtime.heap);

    let mut pending = snapshot.into_iter();
    while let Some(key) = pending.next() {
        let value = match call_method(runtime, other, "__getitem__", std::slice::from_ref(&key)) {
            Ok(value) => value,
            Err(err) => {
                key.drop_with_heap(&mut runtime.heap);
                for rest in pending {
                    rest.drop_with_heap(&mut runtime.heap);
                }
                return Err(err);
            }
        };
        if let Err(err) = dict_set_item(&mut runtime.heap, dict, key, value) {
            for rest in pending {
                rest.drop_with_heap(&mut runtime.heap);
            }
            return Err(err);
        }
    }
    Ok(())
}

/// `d.update(pairs)`, pair-sequence flavor: the argument is a list or tuple
/// whose elements are two-item sequences.
pub fn dict_update_pairs(heap: &mut Heap, dict: HeapId, pairs: HeapId) -> RunResult<()> {
    let len = match heap.get(pairs) {
        HeapData::List(items) => items.len(),
        HeapData::Tuple(items) => items.len(),
        other => {
            return Err(ExcType::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };
    for i in 0..len {
        let element = match heap.get(pairs) {
            HeapData::List(items) => items.as_slice().get(i).map(|v| v.clone_ref(heap)),
            HeapData::Tuple(items) => items.as_slice().get(i).map(|v| v.clone_ref(heap)),
            _ => unreachable!(),
        };
        let Some(element) = element else {
            break;
        };
        let pair: Option<(Value, Value)> = match &element {
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Tuple(items) if items.len() == 2 => {
                    Some((items.as_slice()[0].clone_ref(heap), items.as_slice()[1].clone_ref(heap)))
                }
                HeapData::List(items) if items.len() == 2 => {
                    Some((items.as_slice()[0].clone_ref(heap), items.as_slice()[1].clone_ref(heap)))
                }
                HeapData::Tuple(items) => {
                    let err = ExcType::value_error(format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        items.len()
                    ));
                    element.drop_with_heap(heap);
                    return Err(err);
                }
                HeapData::List(items) => {
                    let err = ExcType::value_error(format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        items.len()
                    ));
                    element.drop_with_heap(heap);
                    return Err(err);
                }
                _ => None,
            },
            _ => None,
        };
        let Some((key, value)) = pair else {
            let err = ExcType::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ));
            element.drop_with_heap(heap);
            return Err(err);
        };
        element.drop_with_heap(heap);
        dict_set_item(heap, dict, key, value)?;
    }
    Ok(())
}

/// Guard for the compiled `for` loop over a dict: raises the host's
/// `RuntimeError` when the dict's size no longer matches the size captured
/// when iteration began.
pub fn dict_check_size(heap: &Heap, dict: HeapId, expected: usize) -> RunResult<()> {
    let HeapData::Dict(d) = heap.get(dict) else {
        unreachable!("dict_check_size: not a dict");
    };
    if d.len() == expected {
        Ok(())
    } else {
        Err(ExcType::dict_changed_size())
    }
}

/// One step of key iteration: the key at `offset` plus the next offset, or
/// `None` when the dict is exhausted. The key is a fresh reference.
pub fn dict_next_key(heap: &mut Heap, dict: HeapId, offset: usize) -> Option<(usize, Value)> {
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_next_key: not a dict");
        };
        let entry = d.entries.get(offset)?;
        Some((offset + 1, entry.key.clone_ref(heap)))
    })
}

/// One step of value iteration, analogous to [`dict_next_key`].
pub fn dict_next_value(heap: &mut Heap, dict: HeapId, offset: usize) -> Option<(usize, Value)> {
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_next_value: not a dict");
        };
        let entry = d.entries.get(offset)?;
        Some((offset + 1, entry.value.clone_ref(heap)))
    })
}

/// One step of item iteration: both the key and the value, fresh references.
pub fn dict_next_item(heap: &mut Heap, dict: HeapId, offset: usize) -> Option<(usize, Value, Value)> {
    heap.with_taken(dict, |heap, data| {
        let HeapData::Dict(d) = data else {
            unreachable!("dict_next_item: not a dict");
        };
        let entry = d.entries.get(offset)?;
        Some((offset + 1, entry.key.clone_ref(heap), entry.value.clone_ref(heap)))
    })
}

/// Iteration state for a compiled dict loop: captured size plus a dense
/// offset. Built by the loop header, checked and advanced each step.
#[derive(Debug, Clone, Copy)]
pub struct DictIter {
    expected_size: usize,
    offset: usize,
}

impl DictIter {
    /// Captures the dict's current size and starts at offset zero.
    #[must_use]
    pub fn begin(heap: &Heap, dict: HeapId) -> Self {
        let HeapData::Dict(d) = heap.get(dict) else {
            unreachable!("DictIter::begin: not a dict");
        };
        Self {
            expected_size: d.len(),
            offset: 0,
        }
    }

    /// Checks the size guard, then yields the next key.
    pub fn next_key(&mut self, heap: &mut Heap, dict: HeapId) -> RunResult<Option<Value>> {
        dict_check_size(heap, dict, self.expected_size)?;
        Ok(dict_next_key(heap, dict, self.offset).map(|(next, key)| {
            self.offset = next;
            key
        }))
    }

    /// Checks the size guard, then yields the next key/value pair.
    pub fn next_item(&mut self, heap: &mut Heap, dict: HeapId) -> RunResult<Option<(Value, Value)>> {
        dict_check_size(heap, dict, self.expected_size)?;
        Ok(dict_next_item(heap, dict, self.offset).map(|(next, key, value)| {
            self.offset = next;
            (key, value)
        }))
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;
    use crate::{
        exception::{RunError, SimpleException},
        types::List,
    };

    fn str_key(heap: &mut Heap, s: &str) -> Value {
        Value::Ref(heap.allocate(HeapData::Str(s.into())))
    }

    fn empty_dict(heap: &mut Heap) -> HeapId {
        heap.allocate(HeapData::Dict(Dict::default()))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let key = str_key(&mut heap, "alpha");
        let stored = key.clone_ref(&heap);
        dict_set_item(&mut heap, d, stored, Value::Bool(true)).unwrap();
        let got = dict_get(&mut heap, d, &key).unwrap();
        assert_eq!(got, Some(Value::Bool(true)));
        assert_eq!(dict_get(&mut heap, d, &Value::None).unwrap(), None);
        key.drop_with_heap(&mut heap);
        heap.dec_ref(d);
    }

    #[test]
    fn overwrite_keeps_original_key_and_order() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        for name in ["a", "b", "c"] {
            let k = str_key(&mut heap, name);
            dict_set_item(&mut heap, d, k, Value::None).unwrap();
        }
        let b = str_key(&mut heap, "b");
        dict_set_item(&mut heap, d, b, Value::Bool(false)).unwrap();

        let mut order = Vec::new();
        let mut offset = 0;
        while let Some((next, key)) = dict_next_key(&mut heap, d, offset) {
            order.push(key.as_str(&heap).unwrap().to_owned());
            key.drop_with_heap(&mut heap);
            offset = next;
        }
        assert_eq!(order, ["a", "b", "c"]);
        heap.dec_ref(d);
    }

    #[test]
    fn numeric_keys_collide_across_representations() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let one = Value::Ref(heap.allocate(HeapData::Int(BigInt::from(1))));
        dict_set_item(&mut heap, d, one, Value::Bool(false)).unwrap();
        // True hashes and compares equal to 1, so this overwrites
        dict_set_item(&mut heap, d, Value::Bool(true), Value::Bool(true)).unwrap();
        let got = dict_get(&mut heap, d, &Value::Float(1.0)).unwrap();
        assert_eq!(got, Some(Value::Bool(true)));
        let HeapData::Dict(inner) = heap.get(d) else { unreachable!() };
        assert_eq!(inner.len(), 1);
        heap.dec_ref(d);
    }

    #[test]
    fn big_float_key_finds_the_equal_int_entry() {
        use num_traits::FromPrimitive;

        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        // 1e30's exact integer value, well beyond i64
        let exact = Value::Ref(heap.allocate(HeapData::Int(BigInt::from_f64(1e30).unwrap())));
        dict_set_item(&mut heap, d, exact, Value::Bool(true)).unwrap();
        let got = dict_get(&mut heap, d, &Value::Float(1e30)).unwrap();
        assert_eq!(got, Some(Value::Bool(true)));
        heap.dec_ref(d);
    }

    #[test]
    fn unhashable_key_is_type_error() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let list = Value::Ref(heap.allocate(HeapData::List(List::default())));
        let err = dict_set_item(&mut heap, d, list, Value::None).unwrap_err();
        assert_eq!(
            err,
            RunError::Exc(SimpleException::new_msg(ExcType::TypeError, "unhashable type: 'list'"))
        );
        heap.dec_ref(d);
    }

    #[test]
    fn pop_compacts_and_later_offsets_stay_valid() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        for name in ["a", "b", "c"] {
            let k = str_key(&mut heap, name);
            dict_set_item(&mut heap, d, k, Value::None).unwrap();
        }
        let b = str_key(&mut heap, "b");
        let popped = dict_pop(&mut heap, d, &b).unwrap();
        assert_eq!(popped, Some(Value::None));
        assert_eq!(dict_pop(&mut heap, d, &b).unwrap(), None);
        b.drop_with_heap(&mut heap);

        // "c" is still reachable through the compacted table
        let c = str_key(&mut heap, "c");
        assert!(dict_contains(&mut heap, d, &c).unwrap());
        c.drop_with_heap(&mut heap);
        heap.dec_ref(d);
    }

    #[test]
    fn iteration_guard_catches_structural_mutation() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let k = str_key(&mut heap, "start");
        dict_set_item(&mut heap, d, k, Value::None).unwrap();

        let mut iter = DictIter::begin(&heap, d);
        let first = iter.next_key(&mut heap, d).unwrap().unwrap();
        first.drop_with_heap(&mut heap);

        let extra = str_key(&mut heap, "added");
        dict_set_item(&mut heap, d, extra, Value::None).unwrap();
        let err = iter.next_key(&mut heap, d).unwrap_err();
        assert_eq!(
            err,
            RunError::Exc(SimpleException::new_msg(
                ExcType::RuntimeError,
                "dictionary changed size during iteration"
            ))
        );
        heap.dec_ref(d);
    }

    #[test]
    fn overwrite_during_iteration_is_allowed() {
        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let k = str_key(&mut heap, "k");
        let stored = k.clone_ref(&heap);
        dict_set_item(&mut heap, d, stored, Value::Bool(false)).unwrap();

        let mut iter = DictIter::begin(&heap, d);
        // Value overwrite does not change the size, so the guard passes
        let again = k.clone_ref(&heap);
        dict_set_item(&mut heap, d, again, Value::Bool(true)).unwrap();
        let key = iter.next_key(&mut heap, d).unwrap().unwrap();
        key.drop_with_heap(&mut heap);
        assert_eq!(iter.next_key(&mut heap, d).unwrap(), None);
        k.drop_with_heap(&mut heap);
        heap.dec_ref(d);
    }

    #[test]
    fn update_from_pairs_checks_shape() {
        use crate::types::Tuple;

        let mut heap = Heap::default();
        let d = empty_dict(&mut heap);
        let k = str_key(&mut heap, "k");
        let good = Value::Ref(heap.allocate(HeapData::Tuple(Tuple::from_values(vec![k, Value::Bool(true)]))));
        let pairs = heap.allocate(HeapData::List(List::from_values(vec![good])));
        dict_update_pairs(&mut heap, d, pairs).unwrap();
        let k = str_key(&mut heap, "k");
        assert_eq!(dict_get(&mut heap, d, &k).unwrap(), Some(Value::Bool(true)));
        k.drop_with_heap(&mut heap);
        heap.dec_ref(pairs);

        let triple = Value::Ref(heap.allocate(HeapData::Tuple(Tuple::from_values(vec![
            Value::None,
            Value::None,
            Value::None,
        ]))));
        let pairs = heap.allocate(HeapData::List(List::from_values(vec![triple])));
        let err = dict_update_pairs(&mut heap, d, pairs).unwrap_err();
        let RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(
            exc.message(),
            Some("dictionary update sequence element #0 has length 3; 2 is required")
        );
        heap.dec_ref(pairs);

        let pairs = heap.allocate(HeapData::List(List::from_values(vec![Value::Bool(true)])));
        let err = dict_update_pairs(&mut heap, d, pairs).unwrap_err();
        let RunError::Exc(exc) = err else { unreachable!() };
        assert_eq!(
            exc.message(),
            Some("cannot convert dictionary update sequence element #0 to a sequence")
        );
        heap.dec_ref(pairs);
        heap.dec_ref(d);
    }

    #[test]
    fn update_overwrites_and_duplicate_mode_errors() {
        let mut heap = Heap::default();
        let a = empty_dict(&mut heap);
        let b = empty_dict(&mut heap);
        let shared = str_key(&mut heap, "x");
        let in_a = shared.clone_ref(&heap);
        dict_set_item(&mut heap, a, in_a, Value::Bool(false)).unwrap();
        let in_b = shared.clone_ref(&heap);
        dict_set_item(&mut heap, b, in_b, Value::Bool(true)).unwrap();

        dict_update(&mut heap, a, b, UpdateMode::Overwrite).unwrap();
        assert_eq!(dict_get(&mut heap, a, &shared).unwrap(), Some(Value::Bool(true)));

        let err = dict_update(&mut heap, a, b, UpdateMode::ErrorOnDuplicate).unwrap_err();
        assert_eq!(
            err,
            RunError::Exc(SimpleException::new_msg(
                ExcType::TypeError,
                "got multiple values for keyword argument 'x'"
            ))
        );
        shared.drop_with_heap(&mut heap);
        heap.dec_ref(b);
        heap.dec_ref(a);
    }
}
