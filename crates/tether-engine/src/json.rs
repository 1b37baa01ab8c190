//! JSON import and export of host values
//!
//! Used by tests and tools to build host values from literals and to
//! snapshot results. Export follows the host's own serialization rules:
//! functions and `undefined` properties are skipped, `undefined` array
//! elements become `null`, and integral numbers are emitted as integers.

use serde_json::{Map, Number, Value};
use tether_sdk::{HostEnv, HostValue, ValueKind, MAX_SAFE_INTEGER};

use crate::defaults::MAX_JSON_DEPTH;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;

impl Runtime {
    /// Build a host value from JSON
    pub fn from_json(&self, value: &Value) -> EngineResult<HostValue> {
        Ok(match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => self.string(s),
            Value::Array(items) => {
                let array = self.create_array(items.len())?;
                for (i, item) in items.iter().enumerate() {
                    let element = self.from_json(item)?;
                    self.array_set(array, i, element)?;
                }
                array
            }
            Value::Object(fields) => {
                let object = self.object();
                for (key, field) in fields {
                    let value = self.from_json(field)?;
                    self.set_property(object, key, value)?;
                }
                object
            }
        })
    }

    /// Snapshot a host value as JSON
    pub fn to_json(&self, value: HostValue) -> EngineResult<Value> {
        self.to_json_at(value, 0)
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// `None` for values the host serializer omits
    fn to_json_at(&self, value: HostValue, depth: usize) -> EngineResult<Option<Value>> {
        if depth > MAX_JSON_DEPTH {
            return Err(EngineError::Json("value is too deeply nested or cyclic".to_string()));
        }

        Ok(Some(match value {
            HostValue::Undefined => return Ok(None),
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(b),
            HostValue::Number(n) => number(n),
            HostValue::Ref(_) => match self.kind_of(value) {
                ValueKind::String => Value::String(self.to_rust_string(value)?),
                ValueKind::BigInt => {
                    let n = self.read_bigint(value)?;
                    i64::try_from(n)
                        .map(Value::from)
                        .or_else(|_| u64::try_from(n).map(Value::from))
                        .unwrap_or_else(|_| Value::String(n.to_string()))
                }
                ValueKind::Function | ValueKind::Undefined => return Ok(None),
                ValueKind::Array => {
                    let len = self.array_len(value)?;
                    let mut items = Vec::with_capacity(len);
                    for i in 0..len {
                        let element = self.array_get(value, i)?;
                        items.push(self.to_json_at(element, depth + 1)?.unwrap_or(Value::Null));
                    }
                    Value::Array(items)
                }
                _ => {
                    let mut fields = Map::new();
                    for key in self.property_names(value)? {
                        let field = self.get_property(value, &key)?;
                        if let Some(json) = self.to_json_at(field, depth + 1)? {
                            fields.insert(key, json);
                        }
                    }
                    Value::Object(fields)
                }
            },
        }))
    }
}

fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
