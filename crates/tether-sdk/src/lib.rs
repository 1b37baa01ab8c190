//! Tether SDK - marshalling and lifetime bridge for native modules
//!
//! This crate lets native Rust code export functions, classes and values to a
//! dynamic, garbage-collected scripting host. Values crossing the boundary
//! are converted by declared type ([`TypeCodec`]), host arguments are bound
//! to native parameters ([`ArgumentBinder`]), native resources handed to the
//! host are tracked until the host collects them ([`HandleRegistry`]).
//!
//! The host is only ever seen through the [`HostEnv`] trait.
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{Bridge, FunctionDescriptor, NativeFunction, NativeModule, NativeValue, TypeTag};
//!
//! pub fn init() -> NativeModule {
//!     NativeModule::new("greeter").function(NativeFunction::new(
//!         FunctionDescriptor::new("greet").param(TypeTag::String).returns(TypeTag::String),
//!         |_, args| {
//!             let name = args[0].as_str().unwrap_or("world");
//!             Ok(NativeValue::string(format!("Hello, {}!", name)))
//!         },
//!     ))
//! }
//! ```

#![warn(missing_docs)]

pub mod allocator;
pub mod binder;
pub mod bridge;
pub mod callback;
pub mod class;
pub mod codec;
pub mod collections;
pub mod context;
pub mod convert;
pub mod error;
pub mod function;
pub mod handle;
pub mod module;
pub mod pool;
pub mod queue;
pub mod value;

pub use allocator::Allocator;
pub use binder::{ArgumentBinder, FunctionDescriptor, FunctionKind, Param};
pub use bridge::{Bridge, BridgeConfig};
pub use callback::{invoke, invoke_async, CallbackFuture, ThreadsafeCallback};
pub use class::{wrap_instance, AsyncTask, ClassBuilder, ExportedClass, MethodEntry, MethodKind};
pub use codec::{TypeCodec, MAX_SAFE_INTEGER};
pub use collections::{HostArray, HostObject};
pub use context::{
    AccessorDefinition, CallFrame, ClassDefinition, Deferred, Finalizer, HostCallback, HostEnv, Microtask,
    Persistent, ReferenceId,
};
pub use convert::{FromNative, IntoNative, NativeType, Reflect, ReflectMethods};
pub use error::{BridgeError, BridgeResult, HostError, HostResult, PathSegment, ValuePath};
pub use function::{CallContext, NativeFunction};
pub use handle::{Handle, HandleId, HandleRegistry, HandleState, PinGuard};
pub use module::NativeModule;
pub use pool::WorkerPool;
pub use queue::{CallQueue, CallReceiver, LoopHold, QueuedCall};
pub use value::{
    FieldShape, HeapRef, HostFunction, HostValue, NativeValue, ResourceType, StructShape, TypeTag, ValueKind,
};
