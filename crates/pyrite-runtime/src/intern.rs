//! Process-lifetime interned string table.
//!
//! The fixed names the runtime looks up constantly (dunders consulted
//! during class construction, the mapping-protocol method names, the
//! reflected arithmetic and rich-compare dunders) are allocated once at
//! init and held for the life of the runtime. Dynamic interning is
//! available for names discovered at load time.

use hashbrown::HashMap;
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// The fixed string table. Iteration order defines the storage index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, IntoStaticStr)]
pub enum StaticStr {
    #[strum(serialize = "__name__")]
    Name,
    #[strum(serialize = "__module__")]
    Module,
    #[strum(serialize = "__qualname__")]
    Qualname,
    #[strum(serialize = "__init_subclass__")]
    InitSubclass,
    #[strum(serialize = "__mro_entries__")]
    MroEntries,
    #[strum(serialize = "__orig_bases__")]
    OrigBases,
    #[strum(serialize = "__slots__")]
    Slots,
    #[strum(serialize = "_gorg")]
    Gorg,
    #[strum(serialize = "update")]
    Update,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "values")]
    Values,
    #[strum(serialize = "items")]
    Items,
    #[strum(serialize = "close")]
    Close,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "send")]
    Send,
    #[strum(serialize = "__radd__")]
    Radd,
    #[strum(serialize = "__rsub__")]
    Rsub,
    #[strum(serialize = "__rmul__")]
    Rmul,
    #[strum(serialize = "__rtruediv__")]
    Rtruediv,
    #[strum(serialize = "__rfloordiv__")]
    Rfloordiv,
    #[strum(serialize = "__rmod__")]
    Rmod,
    #[strum(serialize = "__eq__")]
    Eq,
    #[strum(serialize = "__ne__")]
    Ne,
    #[strum(serialize = "__lt__")]
    Lt,
    #[strum(serialize = "__le__")]
    Le,
    #[strum(serialize = "__gt__")]
    Gt,
    #[strum(serialize = "__ge__")]
    Ge,
}

impl StaticStr {
    /// The interned text.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// The interning table: the fixed entries plus dynamically interned names.
///
/// Every stored id carries one reference that is never released; the table
/// lives as long as the runtime.
#[derive(Debug)]
pub struct Interns {
    fixed: Vec<HeapId>,
    dynamic: HashMap<String, HeapId, ahash::RandomState>,
}

impl Interns {
    /// Allocates the fixed table.
    #[must_use]
    pub fn new(heap: &mut Heap) -> Self {
        let fixed = StaticStr::iter()
            .map(|s| heap.allocate(HeapData::Str(s.as_str().into())))
            .collect();
        Self {
            fixed,
            dynamic: HashMap::default(),
        }
    }

    /// The interned id of a fixed entry.
    #[must_use]
    pub fn get(&self, s: StaticStr) -> HeapId {
        self.fixed[s as usize]
    }

    /// A fresh reference to a fixed entry as a value.
    #[must_use]
    pub fn get_value(&self, heap: &Heap, s: StaticStr) -> Value {
        let id = self.get(s);
        heap.inc_ref(id);
        Value::Ref(id)
    }

    /// Interns an arbitrary name, reusing the existing id when present.
    /// The returned id is borrowed from the table.
    pub fn intern(&mut self, heap: &mut Heap, name: &str) -> HeapId {
        if let Some(s) = StaticStr::iter().find(|s| s.as_str() == name) {
            return self.get(s);
        }
        if let Some(&id) = self.dynamic.get(name) {
            return id;
        }
        let id = heap.allocate(HeapData::Str(name.into()));
        self.dynamic.insert(name.to_owned(), id);
        id
    }
}
