//! Collection accessors over host arrays and objects
//!
//! Thin typed views that let native code read and mutate host collections in
//! place. Missing keys and indices read as `undefined`, never as errors.

use crate::context::HostEnv;
use crate::error::{BridgeError, BridgeResult, ValuePath};
use crate::value::{HostValue, ValueKind};

fn host<T>(env: &dyn HostEnv, result: crate::error::HostResult<T>) -> BridgeResult<T> {
    result.map_err(|e| BridgeError::from_host(env, e))
}

// ============================================================================
// HostArray
// ============================================================================

/// View over a host array
#[derive(Clone, Copy)]
pub struct HostArray<'a> {
    env: &'a dyn HostEnv,
    value: HostValue,
}

impl<'a> HostArray<'a> {
    /// View `value`, which must be an array
    pub fn new(env: &'a dyn HostEnv, value: HostValue) -> BridgeResult<Self> {
        match env.kind_of(value) {
            ValueKind::Array => Ok(Self { env, value }),
            got => Err(BridgeError::ArrayExpected {
                at: ValuePath::root(),
                got,
            }),
        }
    }

    /// Allocate an empty array
    pub fn create(env: &'a dyn HostEnv) -> BridgeResult<Self> {
        let value = host(env, env.create_array(0))?;
        Ok(Self { env, value })
    }

    /// The underlying host value
    pub fn value(&self) -> HostValue {
        self.value
    }

    /// Number of elements
    pub fn len(&self) -> BridgeResult<usize> {
        host(self.env, self.env.array_len(self.value))
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`, `undefined` past the end
    pub fn get_at(&self, index: usize) -> BridgeResult<HostValue> {
        host(self.env, self.env.array_get(self.value, index))
    }

    /// Write `index`; writing past the end leaves undefined holes
    pub fn set_at(&self, index: usize, value: HostValue) -> BridgeResult<()> {
        host(self.env, self.env.array_set(self.value, index, value))
    }

    /// Append an element
    pub fn push(&self, value: HostValue) -> BridgeResult<()> {
        let len = self.len()?;
        self.set_at(len, value)
    }

    /// Copy the elements out
    pub fn to_vec(&self) -> BridgeResult<Vec<HostValue>> {
        (0..self.len()?).map(|i| self.get_at(i)).collect()
    }
}

// ============================================================================
// HostObject
// ============================================================================

/// View over a host object
#[derive(Clone, Copy)]
pub struct HostObject<'a> {
    env: &'a dyn HostEnv,
    value: HostValue,
}

impl<'a> HostObject<'a> {
    /// View `value`, which must be object-like (object, array or function)
    pub fn new(env: &'a dyn HostEnv, value: HostValue) -> BridgeResult<Self> {
        let got = env.kind_of(value);
        if got.is_object_like() {
            Ok(Self { env, value })
        } else {
            Err(BridgeError::ObjectExpected {
                at: ValuePath::root(),
                got,
            })
        }
    }

    /// Allocate an empty object
    pub fn create(env: &'a dyn HostEnv) -> BridgeResult<Self> {
        let value = host(env, env.create_object())?;
        Ok(Self { env, value })
    }

    /// The underlying host value
    pub fn value(&self) -> HostValue {
        self.value
    }

    /// Whether `key` exists on the object or its prototype chain
    pub fn has(&self, key: &str) -> BridgeResult<bool> {
        host(self.env, self.env.has_property(self.value, key))
    }

    /// Whether `key` is an own property
    pub fn has_own(&self, key: &str) -> BridgeResult<bool> {
        host(self.env, self.env.has_own_property(self.value, key))
    }

    /// Property value, `undefined` when absent
    pub fn get(&self, key: &str) -> BridgeResult<HostValue> {
        host(self.env, self.env.get_property(self.value, key))
    }

    /// Write a property
    pub fn set(&self, key: &str, value: HostValue) -> BridgeResult<()> {
        host(self.env, self.env.set_property(self.value, key, value))
    }

    /// Remove an own property; removing a missing key succeeds
    pub fn delete(&self, key: &str) -> BridgeResult<bool> {
        host(self.env, self.env.delete_property(self.value, key))
    }

    /// Own enumerable keys in insertion order
    pub fn property_names(&self) -> BridgeResult<Vec<String>> {
        host(self.env, self.env.property_names(self.value))
    }
}
