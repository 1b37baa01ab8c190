//! Traits for converting between Rust types and [`NativeValue`]s.
//!
//! [`NativeType`] names the declared [`TypeTag`] of a Rust type,
//! [`IntoNative`] and [`FromNative`] move values in and out of the tagged
//! representation. The derive macros in `tether-native` generate all three
//! (plus [`Reflect`]) for plain structs.
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{FromNative, IntoNative, NativeType, NativeValue, TypeTag};
//!
//! assert_eq!(<Vec<u16>>::type_tag(), TypeTag::array(TypeTag::U16));
//! let v = vec![1u16, 2].into_native();
//! assert_eq!(Vec::<u16>::from_native(v).unwrap(), vec![1, 2]);
//! ```

use crate::allocator::Allocator;
use crate::class::MethodEntry;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::value::{HostFunction, HostValue, NativeValue, StructShape, TypeTag};

/// Rust type with a fixed declared [`TypeTag`]
pub trait NativeType {
    /// Declared type used for parameters, returns and fields
    fn type_tag() -> TypeTag;
}

/// Convert a Rust value into a [`NativeValue`]
pub trait IntoNative {
    /// Perform the conversion
    fn into_native(self) -> NativeValue;
}

/// Convert a [`NativeValue`] into a Rust value
pub trait FromNative: Sized {
    /// Perform the conversion, failing on a mismatched variant
    fn from_native(value: NativeValue) -> BridgeResult<Self>;
}

fn mismatch(expected: &str, got: &NativeValue) -> BridgeError {
    BridgeError::mismatch(expected, got.type_name())
}

// ============================================================================
// Primitives
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NativeType for $ty {
                fn type_tag() -> TypeTag {
                    TypeTag::$variant
                }
            }

            impl IntoNative for $ty {
                fn into_native(self) -> NativeValue {
                    NativeValue::$variant(self)
                }
            }

            impl FromNative for $ty {
                fn from_native(value: NativeValue) -> BridgeResult<Self> {
                    if let NativeValue::$variant(v) = value {
                        return Ok(v);
                    }
                    // Integers of another width convert when the value fits.
                    value
                        .as_integer()
                        .and_then(|wide| <$ty>::try_from(wide).ok())
                        .ok_or_else(|| mismatch(stringify!($ty), &value))
                }
            }
        )*
    };
}

impl_integer! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
}

impl NativeType for f32 {
    fn type_tag() -> TypeTag {
        TypeTag::F32
    }
}

impl IntoNative for f32 {
    fn into_native(self) -> NativeValue {
        NativeValue::F32(self)
    }
}

impl FromNative for f32 {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::F32(v) => Ok(v),
            NativeValue::F64(v) => Ok(v as f32),
            other => Err(mismatch("f32", &other)),
        }
    }
}

impl NativeType for f64 {
    fn type_tag() -> TypeTag {
        TypeTag::F64
    }
}

impl IntoNative for f64 {
    fn into_native(self) -> NativeValue {
        NativeValue::F64(self)
    }
}

impl FromNative for f64 {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::F64(v) => Ok(v),
            NativeValue::F32(v) => Ok(v as f64),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl NativeType for bool {
    fn type_tag() -> TypeTag {
        TypeTag::Bool
    }
}

impl IntoNative for bool {
    fn into_native(self) -> NativeValue {
        NativeValue::Bool(self)
    }
}

impl FromNative for bool {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl NativeType for String {
    fn type_tag() -> TypeTag {
        TypeTag::String
    }
}

impl IntoNative for String {
    fn into_native(self) -> NativeValue {
        NativeValue::String(self)
    }
}

impl IntoNative for &str {
    fn into_native(self) -> NativeValue {
        NativeValue::String(self.to_string())
    }
}

impl FromNative for String {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

// Unit type (for functions that return void)
impl NativeType for () {
    fn type_tag() -> TypeTag {
        TypeTag::Void
    }
}

impl IntoNative for () {
    fn into_native(self) -> NativeValue {
        NativeValue::Void
    }
}

impl FromNative for () {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Void => Ok(()),
            other => Err(mismatch("void", &other)),
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: NativeType> NativeType for Option<T> {
    fn type_tag() -> TypeTag {
        TypeTag::optional(T::type_tag())
    }
}

impl<T: IntoNative> IntoNative for Option<T> {
    fn into_native(self) -> NativeValue {
        match self {
            Some(v) => NativeValue::some(v.into_native()),
            None => NativeValue::none(),
        }
    }
}

impl<T: FromNative> FromNative for Option<T> {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Optional(None) | NativeValue::Void => Ok(None),
            NativeValue::Optional(Some(inner)) => T::from_native(*inner).map(Some),
            other => T::from_native(other).map(Some),
        }
    }
}

impl<T: NativeType> NativeType for Vec<T> {
    fn type_tag() -> TypeTag {
        TypeTag::array(T::type_tag())
    }
}

impl<T: IntoNative> IntoNative for Vec<T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Array(self.into_iter().map(IntoNative::into_native).collect())
    }
}

impl<T: FromNative> FromNative for Vec<T> {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Array(items) => items.into_iter().map(T::from_native).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: NativeType),+> NativeType for ($($name,)+) {
            fn type_tag() -> TypeTag {
                TypeTag::Tuple(vec![$($name::type_tag()),+])
            }
        }

        impl<$($name: IntoNative),+> IntoNative for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_native(self) -> NativeValue {
                let ($($name,)+) = self;
                NativeValue::Array(vec![$($name.into_native()),+])
            }
        }

        impl<$($name: FromNative),+> FromNative for ($($name,)+) {
            fn from_native(value: NativeValue) -> BridgeResult<Self> {
                let expected = [$(stringify!($name)),+].len();
                match value {
                    NativeValue::Array(items) if items.len() == expected => {
                        let mut items = items.into_iter();
                        Ok(($(
                            $name::from_native(items.next().unwrap_or_default())?,
                        )+))
                    }
                    other => Err(mismatch(&format!("tuple of {}", expected), &other)),
                }
            }
        }
    };
}

impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);

// ============================================================================
// Host-side values
// ============================================================================

impl NativeType for HostValue {
    fn type_tag() -> TypeTag {
        TypeTag::Dynamic
    }
}

impl IntoNative for HostValue {
    fn into_native(self) -> NativeValue {
        NativeValue::Dynamic(self)
    }
}

impl FromNative for HostValue {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Dynamic(v) => Ok(v),
            NativeValue::Function(f) => Ok(f.value()),
            other => Err(mismatch("dynamic", &other)),
        }
    }
}

impl NativeType for HostFunction {
    fn type_tag() -> TypeTag {
        TypeTag::Function
    }
}

impl IntoNative for HostFunction {
    fn into_native(self) -> NativeValue {
        NativeValue::Function(self)
    }
}

impl FromNative for HostFunction {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Function(f) => Ok(f),
            other => Err(mismatch("function", &other)),
        }
    }
}

impl IntoNative for Handle {
    fn into_native(self) -> NativeValue {
        NativeValue::Pointer(self)
    }
}

impl FromNative for Handle {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        value.as_handle().ok_or_else(|| mismatch("pointer", &value))
    }
}

impl FromNative for Allocator {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        match value {
            NativeValue::Allocator(a) => Ok(a),
            other => Err(mismatch("allocator", &other)),
        }
    }
}

impl IntoNative for NativeValue {
    fn into_native(self) -> NativeValue {
        self
    }
}

impl FromNative for NativeValue {
    fn from_native(value: NativeValue) -> BridgeResult<Self> {
        Ok(value)
    }
}

// ============================================================================
// Reflection
// ============================================================================

/// Struct whose public fields (and optionally methods) are discoverable at
/// compile time. Usually derived with `#[derive(Reflect)]`.
pub trait Reflect: Send + Sync + Sized + 'static {
    /// Declared public fields in declaration order
    fn shape() -> StructShape;

    /// Read a public field
    fn get_field(&self, name: &str) -> Option<NativeValue>;

    /// Write a public field
    fn set_field(&mut self, name: &str, value: NativeValue) -> BridgeResult<()>;

    /// Methods discovered by convention, empty unless hooked up to
    /// [`ReflectMethods`]
    fn methods() -> Vec<MethodEntry<Self>> {
        Vec::new()
    }
}

/// Method table generated by `#[methods]` on an `impl` block
pub trait ReflectMethods: Sized {
    /// Constructor, instance and static methods in declaration order
    fn method_table() -> Vec<MethodEntry<Self>>;
}
