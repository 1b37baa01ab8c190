//! Host heap
//!
//! Every non-primitive host value lives in a heap cell addressed by a
//! [`HeapRef`]. Cell ids are never reused, so a stale reference is detected
//! as [`HostError::Collected`] instead of aliasing a newer value.

use rustc_hash::FxHashMap;
use tether_sdk::{Finalizer, HeapRef, HostCallback, HostError, HostResult, HostValue, ValueKind};

// ============================================================================
// Objects
// ============================================================================

/// A named property slot
pub(crate) enum Property {
    /// Plain value
    Data(HostValue),
    /// Getter/setter pair of host functions
    Accessor {
        getter: Option<HostValue>,
        setter: Option<HostValue>,
    },
}

/// Native backing of a function object
pub(crate) struct FunctionData {
    pub name: String,
    pub callback: HostCallback,
}

/// Settlement state of a promise
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromiseState {
    /// Not settled yet
    Pending,
    /// Resolved with a value
    Fulfilled(HostValue),
    /// Rejected with a reason
    Rejected(HostValue),
}

/// Internal slots distinguishing object kinds
pub(crate) enum ObjectKind {
    Plain,
    Array(Vec<HostValue>),
    Function(FunctionData),
    Error,
    Promise(PromiseState),
}

/// Native association installed by `wrap`
pub(crate) struct Wrap {
    pub tag: u64,
    pub finalizer: Option<Finalizer>,
}

pub(crate) struct ObjectData {
    pub kind: ObjectKind,
    pub prototype: Option<HeapRef>,
    /// Own properties in insertion order
    pub properties: Vec<(String, Property)>,
    pub wrap: Option<Wrap>,
}

impl ObjectData {
    pub fn new(kind: ObjectKind, prototype: Option<HeapRef>) -> Self {
        ObjectData {
            kind,
            prototype,
            properties: Vec::new(),
            wrap: None,
        }
    }

    pub fn find(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    /// Define or replace an own property, keeping its original position
    pub fn define(&mut self, key: &str, property: Property) {
        match self.find_mut(key) {
            Some(slot) => *slot = property,
            None => self.properties.push((key.to_string(), property)),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.properties.len();
        self.properties.retain(|(k, _)| k != key);
        before != self.properties.len()
    }

    pub fn elements(&self) -> Option<&Vec<HostValue>> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Heap values directly reachable from this object
    pub fn trace(&self, out: &mut Vec<HeapRef>) {
        fn push(out: &mut Vec<HeapRef>, value: HostValue) {
            if let Some(r) = value.heap_ref() {
                out.push(r);
            }
        }

        if let Some(prototype) = self.prototype {
            out.push(prototype);
        }
        for (_, property) in &self.properties {
            match property {
                Property::Data(value) => push(out, *value),
                Property::Accessor { getter, setter } => {
                    getter.iter().chain(setter.iter()).for_each(|v| push(out, *v));
                }
            }
        }
        match &self.kind {
            ObjectKind::Array(elements) => elements.iter().for_each(|v| push(out, *v)),
            ObjectKind::Promise(PromiseState::Fulfilled(v)) | ObjectKind::Promise(PromiseState::Rejected(v)) => {
                push(out, *v)
            }
            _ => {}
        }
    }
}

// ============================================================================
// Heap cells
// ============================================================================

pub(crate) enum HeapData {
    String(Vec<u8>),
    BigInt(i128),
    Object(ObjectData),
}

impl HeapData {
    pub fn kind(&self) -> ValueKind {
        match self {
            HeapData::String(_) => ValueKind::String,
            HeapData::BigInt(_) => ValueKind::BigInt,
            HeapData::Object(object) => match object.kind {
                ObjectKind::Array(_) => ValueKind::Array,
                ObjectKind::Function(_) => ValueKind::Function,
                _ => ValueKind::Object,
            },
        }
    }
}

pub(crate) struct Cell {
    pub data: HeapData,
    pub marked: bool,
}

/// Cell storage with monotonically increasing ids
pub(crate) struct Heap {
    cells: FxHashMap<u64, Cell>,
    next_id: u64,
    allocated_since_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            cells: FxHashMap::default(),
            next_id: 1,
            allocated_since_gc: 0,
        }
    }

    pub fn allocate(&mut self, data: HeapData) -> HeapRef {
        let id = self.next_id;
        self.next_id += 1;
        self.allocated_since_gc += 1;
        self.cells.insert(id, Cell { data, marked: false });
        HeapRef::from_raw(id)
    }

    pub fn contains(&self, r: HeapRef) -> bool {
        self.cells.contains_key(&r.as_raw())
    }

    pub fn get(&self, r: HeapRef) -> HostResult<&HeapData> {
        self.cells
            .get(&r.as_raw())
            .map(|cell| &cell.data)
            .ok_or(HostError::Collected(r))
    }

    pub fn get_mut(&mut self, r: HeapRef) -> HostResult<&mut HeapData> {
        self.cells
            .get_mut(&r.as_raw())
            .map(|cell| &mut cell.data)
            .ok_or(HostError::Collected(r))
    }

    pub fn object(&self, r: HeapRef) -> HostResult<&ObjectData> {
        match self.get(r)? {
            HeapData::Object(object) => Ok(object),
            other => Err(HostError::InvalidArg(format!("{} is not an object", other.kind()))),
        }
    }

    pub fn object_mut(&mut self, r: HeapRef) -> HostResult<&mut ObjectData> {
        match self.get_mut(r)? {
            HeapData::Object(object) => Ok(object),
            other => Err(HostError::InvalidArg(format!("{} is not an object", other.kind()))),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = (&u64, &mut Cell)> {
        self.cells.iter_mut()
    }

    pub(crate) fn cell_mut(&mut self, id: u64) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    /// Remove every unmarked cell, returning the removed cells
    pub(crate) fn remove_unmarked(&mut self) -> Vec<Cell> {
        let dead: Vec<u64> = self
            .cells
            .iter()
            .filter(|(_, cell)| !cell.marked)
            .map(|(id, _)| *id)
            .collect();
        self.allocated_since_gc = 0;
        dead.into_iter().filter_map(|id| self.cells.remove(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_not_reused() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::BigInt(1));
        let removed = heap.remove_unmarked();
        assert_eq!(removed.len(), 1);
        let b = heap.allocate(HeapData::BigInt(2));
        assert_ne!(a, b);
        assert!(matches!(heap.get(a), Err(HostError::Collected(_))));
    }

    #[test]
    fn test_define_keeps_insertion_order() {
        let mut object = ObjectData::new(ObjectKind::Plain, None);
        object.define("b", Property::Data(HostValue::Number(1.0)));
        object.define("a", Property::Data(HostValue::Number(2.0)));
        object.define("b", Property::Data(HostValue::Number(3.0)));
        let keys: Vec<&str> = object.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(matches!(object.find("b"), Some(Property::Data(HostValue::Number(n))) if *n == 3.0));
        assert!(object.remove("a"));
        assert!(!object.remove("a"));
    }

    #[test]
    fn test_kinds() {
        let mut heap = Heap::new();
        let s = heap.allocate(HeapData::String(b"x".to_vec()));
        let arr = heap.allocate(HeapData::Object(ObjectData::new(ObjectKind::Array(Vec::new()), None)));
        assert_eq!(heap.get(s).unwrap().kind(), ValueKind::String);
        assert_eq!(heap.get(arr).unwrap().kind(), ValueKind::Array);
        assert!(heap.object(s).is_err());
    }
}
