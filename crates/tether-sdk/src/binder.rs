//! Function descriptors and argument binding

use std::fmt;

use crate::allocator::Allocator;
use crate::codec::TypeCodec;
use crate::error::{BridgeError, BridgeResult, PathSegment};
use crate::value::{HostValue, NativeValue, TypeTag};

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Filled from the next host argument
    Value(TypeTag),
    /// Filled with the bridge's allocator, never from host arguments
    Allocator,
}

/// Whether the body runs on the host thread or a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Runs inline, returns a value
    Sync,
    /// Runs on the worker pool, returns a promise
    Async,
}

/// Declared signature of an exported function.
///
/// Built once at module initialization and immutable afterwards.
///
/// ```ignore
/// let desc = FunctionDescriptor::new("fnWithAllocatorParam")
///     .allocator()
///     .param(TypeTag::U32)
///     .returns(TypeTag::String);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    name: String,
    params: Vec<Param>,
    returns: TypeTag,
    kind: FunctionKind,
}

impl FunctionDescriptor {
    /// Start a synchronous descriptor with no parameters returning void
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeTag::Void,
            kind: FunctionKind::Sync,
        }
    }

    /// Append a host-visible parameter
    pub fn param(mut self, ty: TypeTag) -> Self {
        self.params.push(Param::Value(ty));
        self
    }

    /// Append an allocator-injection slot
    pub fn allocator(mut self) -> Self {
        self.params.push(Param::Allocator);
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: TypeTag) -> Self {
        self.returns = ty;
        self
    }

    /// Mark the body as asynchronous
    pub fn asynchronous(mut self) -> Self {
        self.kind = FunctionKind::Async;
        self
    }

    /// Exported name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters in order, allocator slots included
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Declared return type
    pub fn return_type(&self) -> &TypeTag {
        &self.returns
    }

    /// Sync or async
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Whether the body runs on the worker pool
    pub fn is_async(&self) -> bool {
        self.kind == FunctionKind::Async
    }

    /// Whether any parameter is a host function
    pub fn accepts_callback(&self) -> bool {
        self.host_params().any(|ty| *ty == TypeTag::Function)
    }

    /// Declared types of the host-visible parameters
    pub fn host_params(&self) -> impl Iterator<Item = &TypeTag> {
        self.params.iter().filter_map(|p| match p {
            Param::Value(ty) => Some(ty),
            Param::Allocator => None,
        })
    }

    /// Reject parameter or return types that cannot cross the boundary
    pub fn validate(&self) -> BridgeResult<()> {
        for (i, ty) in self.host_params().enumerate() {
            ty.validate().map_err(|e| e.within(PathSegment::Argument(i)))?;
        }
        self.returns.validate().map_err(|e| e.within(PathSegment::Return))
    }

    /// Host arguments needed to reach the last required parameter
    pub fn required_arity(&self) -> usize {
        self.host_params()
            .enumerate()
            .filter(|(_, ty)| !ty.is_optional())
            .map(|(i, _)| i + 1)
            .last()
            .unwrap_or(0)
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_async() {
            f.write_str("async ")?;
        }
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match param {
                Param::Value(ty) => write!(f, "{}", ty)?,
                Param::Allocator => f.write_str("allocator")?,
            }
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// Maps host argument lists onto declared parameters
pub struct ArgumentBinder;

impl ArgumentBinder {
    /// Decode `args` against `descriptor`.
    ///
    /// Returns one native value per declared parameter (allocator slots
    /// included, in declared order). Extra host arguments are ignored.
    pub fn bind(
        codec: &TypeCodec<'_>,
        descriptor: &FunctionDescriptor,
        args: &[HostValue],
        allocator: &Allocator,
    ) -> BridgeResult<Vec<NativeValue>> {
        let mut bound = Vec::with_capacity(descriptor.params.len());
        let mut position = 0;

        for param in &descriptor.params {
            let ty = match param {
                Param::Allocator => {
                    bound.push(NativeValue::Allocator(allocator.clone()));
                    continue;
                }
                Param::Value(ty) => ty,
            };

            let value = match args.get(position) {
                Some(arg) => codec
                    .decode(*arg, ty)
                    .map_err(|e| e.within(PathSegment::Argument(position)))?,
                None if ty.is_optional() => NativeValue::none(),
                None => {
                    return Err(BridgeError::MissingArguments {
                        position,
                        expected: descriptor.required_arity(),
                        received: args.len(),
                    })
                }
            };
            bound.push(value);
            position += 1;
        }

        Ok(bound)
    }
}
