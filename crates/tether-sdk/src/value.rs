//! Value model on both sides of the boundary
//!
//! - [`HostValue`]: the host's dynamic value. Primitives are stored inline,
//!   everything else (strings, big-integers, objects, arrays, functions) is an
//!   opaque [`HeapRef`] into the host heap.
//! - [`NativeValue`]: the statically-typed native representation.
//! - [`TypeTag`]: the declared native type a value is converted against.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::allocator::Allocator;
use crate::error::{BridgeError, BridgeResult, PathSegment, ValuePath};
use crate::handle::Handle;

// ============================================================================
// Host values
// ============================================================================

/// Opaque reference to a value living on the host heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u64);

impl HeapRef {
    /// Create from the host's raw slot identifier
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        HeapRef(raw)
    }

    /// Get the host's raw slot identifier
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef(#{})", self.0)
    }
}

/// A dynamic value as seen by the host runtime.
///
/// `HostValue` is `Copy`: it does not keep heap values alive by itself. A
/// heap value is only guaranteed to survive for the duration of the native
/// call that received or created it; anything kept longer must go through a
/// host reference (see [`HostEnv::create_reference`](crate::HostEnv::create_reference)).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HostValue {
    /// `undefined`, the host's "absent" value
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Floating-point number
    Number(f64),
    /// Anything allocated on the host heap
    Ref(HeapRef),
}

impl HostValue {
    /// Check for `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    /// Check for `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    /// Get the heap reference, if this is a heap value
    #[inline]
    pub fn heap_ref(&self) -> Option<HeapRef> {
        match self {
            HostValue::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Get the number, if this is a number
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the boolean, if this is a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Undefined
    }
}

/// Runtime type of a host value, as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean,
    /// Number
    Number,
    /// Big-integer
    BigInt,
    /// String
    String,
    /// Plain object (including class instances, errors and promises)
    Object,
    /// Array
    Array,
    /// Function or constructor
    Function,
}

impl ValueKind {
    /// Host-facing name of the kind
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::BigInt => "bigint",
            ValueKind::String => "string",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Function => "function",
        }
    }

    /// Whether property access is meaningful for this kind
    pub const fn is_object_like(self) -> bool {
        matches!(self, ValueKind::Object | ValueKind::Array | ValueKind::Function)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host function received as an argument.
///
/// Valid for the duration of the native call that received it. Use
/// [`ThreadsafeCallback`](crate::ThreadsafeCallback) or
/// [`invoke_async`](crate::callback::invoke_async) to call it later.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HostFunction(HostValue);

impl HostFunction {
    /// Wrap a value already known to be a function
    pub(crate) fn new(value: HostValue) -> Self {
        HostFunction(value)
    }

    /// Get the underlying host value
    pub fn value(&self) -> HostValue {
        self.0
    }
}

// ============================================================================
// Type tags
// ============================================================================

/// Identity of a native resource type behind an opaque pointer.
///
/// Equality and hashing use the Rust `TypeId` only; the name is diagnostic.
#[derive(Clone, Copy)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    /// Resource type for `T`
    pub fn of<T: 'static>() -> Self {
        ResourceType {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Rust `TypeId` of the resource
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Full Rust type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceType({})", self.name)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One declared field of a struct shape
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    /// Field name as seen by the host
    pub name: String,
    /// Declared native type
    pub ty: TypeTag,
}

/// Declared layout of a native struct: ordered named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StructShape {
    name: String,
    fields: Vec<FieldShape>,
}

impl StructShape {
    /// Start an empty shape
    pub fn new(name: impl Into<String>) -> Self {
        StructShape {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field (declaration order is preserved)
    pub fn field(mut self, name: impl Into<String>, ty: TypeTag) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            ty,
        });
        self
    }

    /// Struct name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldShape] {
        &self.fields
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Declared native type of a parameter, return value or field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    /// No value
    Void,
    /// Boolean
    Bool,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// UTF-8 string
    String,
    /// Value that may be absent
    Optional(Box<TypeTag>),
    /// Fixed-shape struct
    Struct(StructShape),
    /// Homogeneous array
    Array(Box<TypeTag>),
    /// Heterogeneous fixed-length array
    Tuple(Vec<TypeTag>),
    /// Opaque pointer to a registered native resource
    Pointer(ResourceType),
    /// Host function passed as a callback
    Function,
    /// Unconverted host value
    Dynamic,
}

impl TypeTag {
    /// `optional<inner>`
    pub fn optional(inner: TypeTag) -> Self {
        TypeTag::Optional(Box::new(inner))
    }

    /// `array<element>`
    pub fn array(element: TypeTag) -> Self {
        TypeTag::Array(Box::new(element))
    }

    /// Opaque pointer to `T`
    pub fn pointer<T: 'static>() -> Self {
        TypeTag::Pointer(ResourceType::of::<T>())
    }

    /// Whether a missing host value is acceptable for this type
    pub fn is_optional(&self) -> bool {
        matches!(self, TypeTag::Optional(_))
    }

    /// Check that values of this type survive a round trip.
    ///
    /// The host has a single absent value, so `optional<optional<T>>` cannot
    /// tell `Some(None)` from `None` and is rejected.
    pub fn validate(&self) -> BridgeResult<()> {
        match self {
            TypeTag::Optional(inner) if inner.is_optional() => Err(self.nested_optional()),
            TypeTag::Optional(inner) => inner.validate(),
            TypeTag::Array(element) => element.validate().map_err(|e| e.within(PathSegment::Index(0))),
            TypeTag::Tuple(elements) => elements
                .iter()
                .enumerate()
                .try_for_each(|(i, ty)| ty.validate().map_err(|e| e.within(PathSegment::Index(i)))),
            TypeTag::Struct(shape) => shape.fields().iter().try_for_each(|field| {
                field
                    .ty
                    .validate()
                    .map_err(|e| e.within(PathSegment::Field(field.name.clone())))
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn nested_optional(&self) -> BridgeError {
        BridgeError::TypeMismatch {
            at: ValuePath::root(),
            expected: "optional of a non-optional type".to_string(),
            got: self.to_string(),
        }
    }

    /// Whether decoded values of this type reference host values directly
    pub fn holds_host_values(&self) -> bool {
        match self {
            TypeTag::Function | TypeTag::Dynamic => true,
            TypeTag::Optional(inner) | TypeTag::Array(inner) => inner.holds_host_values(),
            TypeTag::Tuple(items) => items.iter().any(TypeTag::holds_host_values),
            TypeTag::Struct(shape) => shape.fields().iter().any(|field| field.ty.holds_host_values()),
            _ => false,
        }
    }

    /// Range and name of the integer types, `None` for everything else
    pub(crate) fn integer_bounds(&self) -> Option<(i128, i128)> {
        let bounds = match self {
            TypeTag::I8 => (i8::MIN as i128, i8::MAX as i128),
            TypeTag::I16 => (i16::MIN as i128, i16::MAX as i128),
            TypeTag::I32 => (i32::MIN as i128, i32::MAX as i128),
            TypeTag::I64 => (i64::MIN as i128, i64::MAX as i128),
            TypeTag::U8 => (0, u8::MAX as i128),
            TypeTag::U16 => (0, u16::MAX as i128),
            TypeTag::U32 => (0, u32::MAX as i128),
            TypeTag::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Void => f.write_str("void"),
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::I8 => f.write_str("i8"),
            TypeTag::I16 => f.write_str("i16"),
            TypeTag::I32 => f.write_str("i32"),
            TypeTag::I64 => f.write_str("i64"),
            TypeTag::U8 => f.write_str("u8"),
            TypeTag::U16 => f.write_str("u16"),
            TypeTag::U32 => f.write_str("u32"),
            TypeTag::U64 => f.write_str("u64"),
            TypeTag::F32 => f.write_str("f32"),
            TypeTag::F64 => f.write_str("f64"),
            TypeTag::String => f.write_str("string"),
            TypeTag::Optional(inner) => write!(f, "optional<{}>", inner),
            TypeTag::Struct(shape) => write!(f, "struct {}", shape.name()),
            TypeTag::Array(element) => write!(f, "array<{}>", element),
            TypeTag::Tuple(elements) => {
                f.write_str("tuple(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                f.write_str(")")
            }
            TypeTag::Pointer(resource) => write!(f, "pointer<{}>", resource),
            TypeTag::Function => f.write_str("function"),
            TypeTag::Dynamic => f.write_str("dynamic"),
        }
    }
}

// ============================================================================
// Native values
// ============================================================================

/// A statically-typed native value.
///
/// Each variant corresponds to exactly one [`TypeTag`] family; conversions to
/// and from the host are driven by the declared tag, never by inspecting the
/// host value's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// No value
    Void,
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    I8(i8),
    /// Signed 16-bit integer
    I16(i16),
    /// Signed 32-bit integer
    I32(i32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Unsigned 64-bit integer
    U64(u64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// UTF-8 string
    String(String),
    /// Present or absent value
    Optional(Option<Box<NativeValue>>),
    /// Struct fields in declaration order
    Struct(Vec<(String, NativeValue)>),
    /// Array or tuple elements in order
    Array(Vec<NativeValue>),
    /// Registered native resource
    Pointer(Handle),
    /// Host function received as a callback parameter
    Function(HostFunction),
    /// Unconverted host value
    Dynamic(HostValue),
    /// Injected allocator (only produced by the argument binder)
    Allocator(Allocator),
}

impl NativeValue {
    /// String value
    pub fn string(s: impl Into<String>) -> Self {
        NativeValue::String(s.into())
    }

    /// Present optional
    pub fn some(value: NativeValue) -> Self {
        NativeValue::Optional(Some(Box::new(value)))
    }

    /// Absent optional
    pub fn none() -> Self {
        NativeValue::Optional(None)
    }

    /// Struct from `(name, value)` pairs, keeping their order
    pub fn structure<K: Into<String>>(fields: impl IntoIterator<Item = (K, NativeValue)>) -> Self {
        NativeValue::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a struct field
    pub fn field(&self, name: &str) -> Option<&NativeValue> {
        match self {
            NativeValue::Struct(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get any integer variant widened to i128
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            NativeValue::I8(v) => Some(v as i128),
            NativeValue::I16(v) => Some(v as i128),
            NativeValue::I32(v) => Some(v as i128),
            NativeValue::I64(v) => Some(v as i128),
            NativeValue::U8(v) => Some(v as i128),
            NativeValue::U16(v) => Some(v as i128),
            NativeValue::U32(v) => Some(v as i128),
            NativeValue::U64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// Get the registered resource handle
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            NativeValue::Pointer(h) => Some(*h),
            _ => None,
        }
    }

    /// Infer the type tag describing this value.
    ///
    /// Absent optionals infer `optional<dynamic>`, arrays infer a tuple of
    /// their element types and structs infer an anonymous shape.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            NativeValue::Void => TypeTag::Void,
            NativeValue::Bool(_) => TypeTag::Bool,
            NativeValue::I8(_) => TypeTag::I8,
            NativeValue::I16(_) => TypeTag::I16,
            NativeValue::I32(_) => TypeTag::I32,
            NativeValue::I64(_) => TypeTag::I64,
            NativeValue::U8(_) => TypeTag::U8,
            NativeValue::U16(_) => TypeTag::U16,
            NativeValue::U32(_) => TypeTag::U32,
            NativeValue::U64(_) => TypeTag::U64,
            NativeValue::F32(_) => TypeTag::F32,
            NativeValue::F64(_) => TypeTag::F64,
            NativeValue::String(_) => TypeTag::String,
            NativeValue::Optional(Some(inner)) => TypeTag::optional(inner.type_tag()),
            NativeValue::Optional(None) => TypeTag::optional(TypeTag::Dynamic),
            NativeValue::Struct(fields) => TypeTag::Struct(
                fields
                    .iter()
                    .fold(StructShape::new(""), |shape, (k, v)| shape.field(k.clone(), v.type_tag())),
            ),
            NativeValue::Array(elements) => {
                TypeTag::Tuple(elements.iter().map(NativeValue::type_tag).collect())
            }
            NativeValue::Pointer(handle) => TypeTag::Pointer(handle.resource()),
            NativeValue::Function(_) => TypeTag::Function,
            NativeValue::Dynamic(_) | NativeValue::Allocator(_) => TypeTag::Dynamic,
        }
    }

    /// Variant name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Void => "void",
            NativeValue::Bool(_) => "bool",
            NativeValue::I8(_) => "i8",
            NativeValue::I16(_) => "i16",
            NativeValue::I32(_) => "i32",
            NativeValue::I64(_) => "i64",
            NativeValue::U8(_) => "u8",
            NativeValue::U16(_) => "u16",
            NativeValue::U32(_) => "u32",
            NativeValue::U64(_) => "u64",
            NativeValue::F32(_) => "f32",
            NativeValue::F64(_) => "f64",
            NativeValue::String(_) => "string",
            NativeValue::Optional(_) => "optional",
            NativeValue::Struct(_) => "struct",
            NativeValue::Array(_) => "array",
            NativeValue::Pointer(_) => "pointer",
            NativeValue::Function(_) => "function",
            NativeValue::Dynamic(_) => "dynamic",
            NativeValue::Allocator(_) => "allocator",
        }
    }
}

impl Default for NativeValue {
    fn default() -> Self {
        NativeValue::Void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    #[test]
    fn test_type_tag_display() {
        assert_eq!(TypeTag::I32.to_string(), "i32");
        assert_eq!(TypeTag::optional(TypeTag::String).to_string(), "optional<string>");
        assert_eq!(TypeTag::array(TypeTag::U64).to_string(), "array<u64>");
        assert_eq!(
            TypeTag::Tuple(vec![TypeTag::I32, TypeTag::String]).to_string(),
            "tuple(i32, string)"
        );
        assert_eq!(TypeTag::pointer::<Widget>().to_string(), "pointer<Widget>");
    }

    #[test]
    fn test_resource_type_identity() {
        let a = ResourceType::of::<Widget>();
        let b = ResourceType::of::<Widget>();
        let c = ResourceType::of::<String>();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.short_name(), "Widget");
    }

    #[test]
    fn test_struct_shape_preserves_order() {
        let shape = StructShape::new("Point")
            .field("y", TypeTag::I32)
            .field("x", TypeTag::I32);
        let names: Vec<_> = shape.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x"]);
        assert!(shape.get("x").is_some());
        assert!(shape.get("z").is_none());
    }

    #[test]
    fn test_native_value_type_tag_inference() {
        let value = NativeValue::structure([
            ("int", NativeValue::I32(1)),
            ("str", NativeValue::string("a")),
        ]);
        match value.type_tag() {
            TypeTag::Struct(shape) => {
                assert_eq!(shape.fields().len(), 2);
                assert_eq!(shape.fields()[1].ty, TypeTag::String);
            }
            other => panic!("expected struct tag, got {}", other),
        }
        assert_eq!(
            NativeValue::Array(vec![NativeValue::I32(1), NativeValue::Bool(true)]).type_tag(),
            TypeTag::Tuple(vec![TypeTag::I32, TypeTag::Bool])
        );
        assert_eq!(NativeValue::none().type_tag(), TypeTag::optional(TypeTag::Dynamic));
    }

    #[test]
    fn test_native_value_accessors() {
        let value = NativeValue::structure([("name", NativeValue::string("x"))]);
        assert_eq!(value.field("name").and_then(|v| v.as_str()), Some("x"));
        assert!(value.field("missing").is_none());
        assert_eq!(NativeValue::U64(u64::MAX).as_integer(), Some(u64::MAX as i128));
        assert_eq!(NativeValue::Bool(true).as_bool(), Some(true));
    }

    #[test]
    fn test_nested_optional_fails_validation() {
        assert!(TypeTag::optional(TypeTag::U32).validate().is_ok());
        let nested = TypeTag::optional(TypeTag::optional(TypeTag::U32));
        assert_eq!(nested.validate().unwrap_err().name(), "TypeMismatch");

        let shape = StructShape::new("Holder").field("inner", TypeTag::array(nested));
        let error = TypeTag::Struct(shape).validate().unwrap_err();
        assert_eq!(
            error.to_string(),
            "inner[0]: type mismatch: expected optional of a non-optional type, got optional<optional<u32>>"
        );
    }

    #[test]
    fn test_host_valued_types() {
        assert!(TypeTag::Dynamic.holds_host_values());
        assert!(TypeTag::optional(TypeTag::Function).holds_host_values());
        assert!(TypeTag::Tuple(vec![TypeTag::U8, TypeTag::Dynamic]).holds_host_values());
        assert!(!TypeTag::array(TypeTag::String).holds_host_values());
        assert!(!TypeTag::pointer::<Widget>().holds_host_values());
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(TypeTag::U8.integer_bounds(), Some((0, 255)));
        assert_eq!(TypeTag::I16.integer_bounds(), Some((-32768, 32767)));
        assert_eq!(TypeTag::F64.integer_bounds(), None);
    }
}
