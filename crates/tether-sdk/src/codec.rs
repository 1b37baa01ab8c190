//! TypeCodec — conversion between native and host values
//!
//! Every conversion is driven by the declared [`TypeTag`]. Host values are
//! never duck-typed: a value either matches the tag's rule or fails with the
//! most specific error, annotated with the path to the offending element.
//!
//! | tag | host → native | native → host |
//! |---|---|---|
//! | `bool` | boolean only | boolean |
//! | `i8`..`u32` | integral number in range | number |
//! | `i64` | integral number or big-integer in range | number within ±(2^53−1), big-integer otherwise |
//! | `u64` | integral number or big-integer in range | big-integer |
//! | `f32`/`f64` | number (f32 range-checked) | number |
//! | `string` | string, valid UTF-8 | string |
//! | `optional<T>` | null/undefined → absent | absent → null |
//! | `optional<optional<T>>` | rejected | rejected |
//! | `struct` | object, fields in declared order | object, keys in declared order |
//! | `array<T>`/`tuple` | array (tuple: exact length) | array |
//! | `pointer<R>` | wrapper registered for exactly `R` | the handle's one wrapper |

use crate::context::HostEnv;
use crate::error::{BridgeError, BridgeResult, HostResult, PathSegment, ValuePath};
use crate::handle::HandleRegistry;
use crate::value::{HostFunction, HostValue, NativeValue, StructShape, TypeTag, ValueKind};

/// Largest integer a host number represents exactly (2^53 − 1)
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Stateless converter bound to one host environment and registry
#[derive(Clone, Copy)]
pub struct TypeCodec<'a> {
    env: &'a dyn HostEnv,
    handles: &'a HandleRegistry,
}

impl<'a> TypeCodec<'a> {
    /// Create a codec for `env`, resolving pointers through `handles`
    pub fn new(env: &'a dyn HostEnv, handles: &'a HandleRegistry) -> Self {
        Self { env, handles }
    }

    /// Host environment the codec allocates in
    pub fn env(&self) -> &'a dyn HostEnv {
        self.env
    }

    fn host<T>(&self, result: HostResult<T>) -> BridgeResult<T> {
        result.map_err(|e| BridgeError::from_host(self.env, e))
    }

    // ========================================================================
    // Native → Host
    // ========================================================================

    /// Encode a native value as the declared type
    pub fn encode(&self, value: &NativeValue, tag: &TypeTag) -> BridgeResult<HostValue> {
        match tag {
            TypeTag::Void => match value {
                NativeValue::Void | NativeValue::Optional(None) => Ok(HostValue::Undefined),
                other => Err(BridgeError::mismatch("void", other.type_name())),
            },

            TypeTag::Bool => match value {
                NativeValue::Bool(b) => Ok(HostValue::Bool(*b)),
                other => Err(BridgeError::mismatch("bool", other.type_name())),
            },

            TypeTag::I8
            | TypeTag::I16
            | TypeTag::I32
            | TypeTag::I64
            | TypeTag::U8
            | TypeTag::U16
            | TypeTag::U32
            | TypeTag::U64 => self.encode_integer(value, tag),

            TypeTag::F32 | TypeTag::F64 => {
                let n = match value {
                    NativeValue::F32(v) => *v as f64,
                    NativeValue::F64(v) => *v,
                    other => match other.as_integer() {
                        Some(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u128 => i as f64,
                        _ => return Err(BridgeError::mismatch(tag.to_string(), other.type_name())),
                    },
                };
                if *tag == TypeTag::F32 && n.is_finite() && n.abs() > f32::MAX as f64 {
                    return Err(range_error(tag, n));
                }
                Ok(HostValue::Number(n))
            }

            TypeTag::String => match value {
                NativeValue::String(s) => self.host(self.env.create_string(s.as_bytes())),
                other => Err(BridgeError::mismatch("string", other.type_name())),
            },

            TypeTag::Optional(inner) if inner.is_optional() => Err(tag.nested_optional()),
            TypeTag::Optional(inner) => match value {
                NativeValue::Optional(None) | NativeValue::Void => Ok(HostValue::Null),
                NativeValue::Optional(Some(v)) => self.encode(v, inner),
                other => self.encode(other, inner),
            },

            TypeTag::Struct(shape) => match value {
                NativeValue::Struct(fields) => self.encode_struct(fields, shape),
                other => Err(BridgeError::mismatch(tag.to_string(), other.type_name())),
            },

            TypeTag::Array(element) => match value {
                NativeValue::Array(items) => {
                    let array = self.host(self.env.create_array(items.len()))?;
                    for (i, item) in items.iter().enumerate() {
                        let encoded = self
                            .encode(item, element)
                            .map_err(|e| e.within(PathSegment::Index(i)))?;
                        self.host(self.env.array_set(array, i, encoded))?;
                    }
                    Ok(array)
                }
                other => Err(BridgeError::mismatch(tag.to_string(), other.type_name())),
            },

            TypeTag::Tuple(elements) => match value {
                NativeValue::Array(items) if items.len() == elements.len() => {
                    let array = self.host(self.env.create_array(items.len()))?;
                    for (i, (item, element)) in items.iter().zip(elements).enumerate() {
                        let encoded = self
                            .encode(item, element)
                            .map_err(|e| e.within(PathSegment::Index(i)))?;
                        self.host(self.env.array_set(array, i, encoded))?;
                    }
                    Ok(array)
                }
                NativeValue::Array(items) => Err(BridgeError::mismatch(
                    tag.to_string(),
                    format!("array of length {}", items.len()),
                )),
                other => Err(BridgeError::mismatch(tag.to_string(), other.type_name())),
            },

            TypeTag::Pointer(resource) => match value {
                NativeValue::Pointer(handle) if handle.resource() == *resource => {
                    self.handles.expose(self.env, *handle)
                }
                NativeValue::Pointer(handle) => Err(BridgeError::mismatch(
                    resource.short_name(),
                    handle.resource().short_name(),
                )),
                other => Err(BridgeError::mismatch(tag.to_string(), other.type_name())),
            },

            TypeTag::Function => match value {
                NativeValue::Function(f) => Ok(f.value()),
                NativeValue::Dynamic(v) if self.env.kind_of(*v) == ValueKind::Function => Ok(*v),
                other => Err(BridgeError::mismatch("function", other.type_name())),
            },

            TypeTag::Dynamic => match value {
                NativeValue::Dynamic(v) => Ok(*v),
                NativeValue::Allocator(_) => Err(BridgeError::mismatch("dynamic", "allocator")),
                other => self.encode_inferred(other),
            },
        }
    }

    /// Encode a value using the type inferred from its own variant
    pub fn encode_inferred(&self, value: &NativeValue) -> BridgeResult<HostValue> {
        self.encode(value, &value.type_tag())
    }

    fn encode_integer(&self, value: &NativeValue, tag: &TypeTag) -> BridgeResult<HostValue> {
        let wide = value
            .as_integer()
            .ok_or_else(|| BridgeError::mismatch(tag.to_string(), value.type_name()))?;
        let (min, max) = tag.integer_bounds().unwrap_or((i128::MIN, i128::MAX));
        if wide < min || wide > max {
            return Err(BridgeError::RangeError {
                at: ValuePath::root(),
                ty: tag.to_string(),
                value: wide.to_string(),
            });
        }

        let as_bigint = match tag {
            TypeTag::U64 => true,
            TypeTag::I64 => wide.unsigned_abs() > MAX_SAFE_INTEGER as u128,
            _ => false,
        };
        if as_bigint {
            self.host(self.env.create_bigint(wide))
        } else {
            Ok(HostValue::Number(wide as f64))
        }
    }

    fn encode_struct(&self, fields: &[(String, NativeValue)], shape: &StructShape) -> BridgeResult<HostValue> {
        let object = self.host(self.env.create_object())?;
        for field in shape.fields() {
            let value = fields.iter().find(|(name, _)| *name == field.name).map(|(_, v)| v);
            let encoded = match value {
                Some(v) => self
                    .encode(v, &field.ty)
                    .map_err(|e| e.within(PathSegment::Field(field.name.clone())))?,
                None if field.ty.is_optional() => HostValue::Null,
                None => {
                    return Err(BridgeError::MissingField {
                        at: ValuePath::root(),
                        field: field.name.clone(),
                    })
                }
            };
            self.host(self.env.set_property(object, &field.name, encoded))?;
        }
        Ok(object)
    }

    // ========================================================================
    // Host → Native
    // ========================================================================

    /// Decode a host value as the declared type
    pub fn decode(&self, value: HostValue, tag: &TypeTag) -> BridgeResult<NativeValue> {
        let kind = self.env.kind_of(value);
        match tag {
            TypeTag::Void => match value {
                HostValue::Undefined | HostValue::Null => Ok(NativeValue::Void),
                _ => Err(BridgeError::mismatch("void", kind.name())),
            },

            TypeTag::Bool => match value {
                HostValue::Bool(b) => Ok(NativeValue::Bool(b)),
                _ => Err(BridgeError::BooleanExpected {
                    at: ValuePath::root(),
                    got: kind,
                }),
            },

            TypeTag::I8 | TypeTag::I16 | TypeTag::I32 | TypeTag::U8 | TypeTag::U16 | TypeTag::U32 => {
                match value {
                    HostValue::Number(n) => integer_from(checked_integral(n, tag)?, tag),
                    _ => Err(BridgeError::NumberExpected {
                        at: ValuePath::root(),
                        got: kind,
                    }),
                }
            }

            TypeTag::I64 | TypeTag::U64 => match value {
                HostValue::Number(n) => integer_from(checked_integral(n, tag)?, tag),
                _ if kind == ValueKind::BigInt => {
                    let wide = self.host(self.env.read_bigint(value))?;
                    integer_from(wide, tag)
                }
                _ => Err(BridgeError::BigIntExpected {
                    at: ValuePath::root(),
                    got: kind,
                }),
            },

            TypeTag::F32 => match value {
                HostValue::Number(n) if n.is_finite() && n.abs() > f32::MAX as f64 => {
                    Err(range_error(tag, n))
                }
                HostValue::Number(n) => Ok(NativeValue::F32(n as f32)),
                _ => Err(BridgeError::NumberExpected {
                    at: ValuePath::root(),
                    got: kind,
                }),
            },

            TypeTag::F64 => match value {
                HostValue::Number(n) => Ok(NativeValue::F64(n)),
                _ => Err(BridgeError::NumberExpected {
                    at: ValuePath::root(),
                    got: kind,
                }),
            },

            TypeTag::String => {
                if kind != ValueKind::String {
                    return Err(BridgeError::StringExpected {
                        at: ValuePath::root(),
                        got: kind,
                    });
                }
                let bytes = self.host(self.env.read_string(value))?;
                String::from_utf8(bytes)
                    .map(NativeValue::String)
                    .map_err(|e| BridgeError::InvalidEncoding {
                        at: ValuePath::root(),
                        offset: e.utf8_error().valid_up_to(),
                    })
            }

            TypeTag::Optional(inner) if inner.is_optional() => Err(tag.nested_optional()),
            TypeTag::Optional(inner) => {
                if value.is_nullish() {
                    Ok(NativeValue::none())
                } else {
                    self.decode(value, inner).map(NativeValue::some)
                }
            }

            TypeTag::Struct(shape) => {
                if !matches!(kind, ValueKind::Object | ValueKind::Function) {
                    return Err(BridgeError::ObjectExpected {
                        at: ValuePath::root(),
                        got: kind,
                    });
                }
                self.decode_struct(value, shape)
            }

            TypeTag::Array(element) => {
                let len = self.array_len(value, kind)?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    let item = self.host(self.env.array_get(value, i))?;
                    items.push(
                        self.decode(item, element)
                            .map_err(|e| e.within(PathSegment::Index(i)))?,
                    );
                }
                Ok(NativeValue::Array(items))
            }

            TypeTag::Tuple(elements) => {
                let len = self.array_len(value, kind)?;
                if len != elements.len() {
                    return Err(BridgeError::mismatch(
                        tag.to_string(),
                        format!("array of length {}", len),
                    ));
                }
                let mut items = Vec::with_capacity(len);
                for (i, element) in elements.iter().enumerate() {
                    let item = self.host(self.env.array_get(value, i))?;
                    items.push(
                        self.decode(item, element)
                            .map_err(|e| e.within(PathSegment::Index(i)))?,
                    );
                }
                Ok(NativeValue::Array(items))
            }

            TypeTag::Pointer(resource) => {
                if !matches!(kind, ValueKind::Object | ValueKind::Function) {
                    return Err(BridgeError::ObjectExpected {
                        at: ValuePath::root(),
                        got: kind,
                    });
                }
                let raw = self
                    .host(self.env.unwrap(value))?
                    .ok_or_else(|| BridgeError::mismatch(resource.short_name(), "unwrapped object"))?;
                let handle = self.handles.lookup(raw).ok_or_else(|| {
                    BridgeError::mismatch(resource.short_name(), format!("disposed {}", resource.short_name()))
                })?;
                if handle.resource() != *resource {
                    return Err(BridgeError::mismatch(
                        resource.short_name(),
                        handle.resource().short_name(),
                    ));
                }
                Ok(NativeValue::Pointer(handle))
            }

            TypeTag::Function => {
                if kind == ValueKind::Function {
                    Ok(NativeValue::Function(HostFunction::new(value)))
                } else {
                    Err(BridgeError::FunctionExpected {
                        at: ValuePath::root(),
                        got: kind,
                    })
                }
            }

            TypeTag::Dynamic => Ok(NativeValue::Dynamic(value)),
        }
    }

    fn array_len(&self, value: HostValue, kind: ValueKind) -> BridgeResult<usize> {
        if kind != ValueKind::Array {
            return Err(BridgeError::ArrayExpected {
                at: ValuePath::root(),
                got: kind,
            });
        }
        self.host(self.env.array_len(value))
    }

    fn decode_struct(&self, object: HostValue, shape: &StructShape) -> BridgeResult<NativeValue> {
        let mut fields = Vec::with_capacity(shape.fields().len());
        for field in shape.fields() {
            let present = self.host(self.env.has_property(object, &field.name))?;
            let decoded = if present {
                let raw = self.host(self.env.get_property(object, &field.name))?;
                self.decode(raw, &field.ty)
                    .map_err(|e| e.within(PathSegment::Field(field.name.clone())))?
            } else if field.ty.is_optional() {
                NativeValue::none()
            } else {
                return Err(BridgeError::MissingField {
                    at: ValuePath::root(),
                    field: field.name.clone(),
                });
            };
            fields.push((field.name.clone(), decoded));
        }
        Ok(NativeValue::Struct(fields))
    }
}

fn range_error(tag: &TypeTag, n: f64) -> BridgeError {
    BridgeError::RangeError {
        at: ValuePath::root(),
        ty: tag.to_string(),
        value: n.to_string(),
    }
}

/// Integral value of a finite number within i128
fn checked_integral(n: f64, tag: &TypeTag) -> BridgeResult<i128> {
    // 2^127 bounds every supported width with room to spare
    if !n.is_finite() || n.fract() != 0.0 || n.abs() >= 1.7e38 {
        return Err(range_error(tag, n));
    }
    Ok(n as i128)
}

fn integer_from(wide: i128, tag: &TypeTag) -> BridgeResult<NativeValue> {
    let out_of_range = || BridgeError::RangeError {
        at: ValuePath::root(),
        ty: tag.to_string(),
        value: wide.to_string(),
    };
    let value = match tag {
        TypeTag::I8 => NativeValue::I8(i8::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::I16 => NativeValue::I16(i16::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::I32 => NativeValue::I32(i32::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::I64 => NativeValue::I64(i64::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::U8 => NativeValue::U8(u8::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::U16 => NativeValue::U16(u16::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::U32 => NativeValue::U32(u32::try_from(wide).map_err(|_| out_of_range())?),
        TypeTag::U64 => NativeValue::U64(u64::try_from(wide).map_err(|_| out_of_range())?),
        _ => return Err(BridgeError::mismatch(tag.to_string(), "integer")),
    };
    Ok(value)
}
