//! Exported native functions and the call boundary
//!
//! Every exported function enters native code through [`NativeFunction::callback`]:
//!
//! 1. bind host arguments against the descriptor (ArgumentBinder),
//! 2. pin every handle passed as a pointer argument,
//! 3. run the body, catching panics,
//! 4. encode the result as the declared return type,
//! 5. convert any [`BridgeError`] into a thrown host value.
//!
//! Async bodies run on the bridge's worker pool and settle a host promise
//! through the call queue.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use crate::binder::{ArgumentBinder, FunctionDescriptor};
use crate::bridge::Bridge;
use crate::callback::{self, CallbackFuture, ThreadsafeCallback};
use crate::codec::TypeCodec;
use crate::collections::{HostArray, HostObject};
use crate::context::{CallFrame, Deferred, HostCallback, HostEnv};
use crate::error::{BridgeError, BridgeResult, PathSegment};
use crate::handle::PinGuard;
use crate::value::{HostFunction, HostValue, NativeValue, TypeTag};

/// Synchronous function body
pub type SyncBody =
    Arc<dyn Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync>;

/// Asynchronous function body, run on a worker thread
pub type AsyncBody = Arc<dyn Fn(Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync>;

// ============================================================================
// Call context
// ============================================================================

/// What a synchronous native body can reach during one call
pub struct CallContext<'a> {
    env: &'a dyn HostEnv,
    bridge: &'a Bridge,
    this: HostValue,
}

impl<'a> CallContext<'a> {
    /// Context for a call with receiver `this`
    pub fn new(env: &'a dyn HostEnv, bridge: &'a Bridge, this: HostValue) -> Self {
        Self { env, bridge, this }
    }

    /// Host environment
    pub fn env(&self) -> &'a dyn HostEnv {
        self.env
    }

    /// Module bridge state
    pub fn bridge(&self) -> &'a Bridge {
        self.bridge
    }

    /// Receiver of the call
    pub fn this(&self) -> HostValue {
        self.this
    }

    /// Codec for explicit conversions
    pub fn codec(&self) -> TypeCodec<'a> {
        self.bridge.codec(self.env)
    }

    /// Call a host function synchronously
    pub fn invoke(
        &self,
        function: HostFunction,
        args: &[NativeValue],
        returns: &TypeTag,
    ) -> BridgeResult<NativeValue> {
        callback::invoke(self.env, self.bridge, function, args, returns)
    }

    /// Schedule a host function call as a microtask
    pub fn invoke_async(
        &self,
        function: HostFunction,
        args: Vec<NativeValue>,
        returns: TypeTag,
    ) -> BridgeResult<CallbackFuture> {
        callback::invoke_async(self.env, self.bridge, function, args, returns)
    }

    /// Make a host function callable from worker threads
    pub fn threadsafe(&self, function: HostFunction, returns: TypeTag) -> BridgeResult<ThreadsafeCallback> {
        ThreadsafeCallback::new(self.env, self.bridge, function, returns)
    }

    /// View a host value as an array
    pub fn array(&self, value: HostValue) -> BridgeResult<HostArray<'a>> {
        HostArray::new(self.env, value)
    }

    /// View a host value as an object
    pub fn object(&self, value: HostValue) -> BridgeResult<HostObject<'a>> {
        HostObject::new(self.env, value)
    }
}

// ============================================================================
// Native functions
// ============================================================================

#[derive(Clone)]
enum Body {
    Sync(SyncBody),
    Async(AsyncBody),
}

/// Descriptor plus body of one exported function
#[derive(Clone)]
pub struct NativeFunction {
    descriptor: FunctionDescriptor,
    body: Body,
}

impl NativeFunction {
    /// Synchronous function
    pub fn new(
        descriptor: FunctionDescriptor,
        body: impl Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: Body::Sync(Arc::new(body)),
        }
    }

    /// Asynchronous function; the descriptor is marked async
    pub fn new_async(
        descriptor: FunctionDescriptor,
        body: impl Fn(Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor: descriptor.asynchronous(),
            body: Body::Async(Arc::new(body)),
        }
    }

    pub(crate) fn from_body(descriptor: FunctionDescriptor, body: SyncBody) -> Self {
        Self {
            descriptor,
            body: Body::Sync(body),
        }
    }

    /// Declared signature
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Host entry point for this function
    pub fn callback(&self, bridge: &Bridge) -> HostCallback {
        let descriptor = self.descriptor.clone();
        let body = self.body.clone();
        let bridge = bridge.clone();
        Rc::new(move |env: &dyn HostEnv, frame: &CallFrame| {
            tracing::trace!(function = descriptor.name(), args = frame.args.len(), "native call");
            let result = match &body {
                Body::Sync(body) => call_sync(env, &bridge, &descriptor, body, frame),
                Body::Async(body) => call_async(env, &bridge, &descriptor, body, frame),
            };
            result.map_err(|e| e.to_host(env))
        })
    }

    /// Create the host function object
    pub fn create(&self, env: &dyn HostEnv, bridge: &Bridge) -> BridgeResult<HostValue> {
        self.descriptor.validate()?;
        env.create_function(self.descriptor.name(), self.callback(bridge))
            .map_err(|e| BridgeError::from_host(env, e))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.descriptor)
    }
}

fn call_sync(
    env: &dyn HostEnv,
    bridge: &Bridge,
    descriptor: &FunctionDescriptor,
    body: &SyncBody,
    frame: &CallFrame,
) -> BridgeResult<HostValue> {
    let codec = bridge.codec(env);
    let args = ArgumentBinder::bind(&codec, descriptor, &frame.args, bridge.allocator())?;
    let _pins = pin_arguments(bridge, &args)?;

    let mut ctx = CallContext::new(env, bridge, frame.this);
    let value = catch_panic(|| body(&mut ctx, args))?;
    codec
        .encode(&value, descriptor.return_type())
        .map_err(|e| e.within(PathSegment::Return))
}

fn call_async(
    env: &dyn HostEnv,
    bridge: &Bridge,
    descriptor: &FunctionDescriptor,
    body: &AsyncBody,
    frame: &CallFrame,
) -> BridgeResult<HostValue> {
    let codec = bridge.codec(env);
    let args = ArgumentBinder::bind(&codec, descriptor, &frame.args, bridge.allocator())?;
    let pins = pin_arguments(bridge, &args)?;
    let body = body.clone();
    spawn_settled(env, bridge, descriptor.return_type().clone(), move || {
        let result = catch_panic(|| body(args));
        drop(pins);
        result
    })
}

// ============================================================================
// Shared call machinery
// ============================================================================

/// Run `job` on the worker pool and return a promise settled with its result
pub(crate) fn spawn_settled(
    env: &dyn HostEnv,
    bridge: &Bridge,
    returns: TypeTag,
    job: impl FnOnce() -> BridgeResult<NativeValue> + Send + 'static,
) -> BridgeResult<HostValue> {
    let (deferred, promise) = env
        .create_promise()
        .map_err(|e| BridgeError::from_host(env, e))?;
    let queue = env.call_queue();
    let hold = queue.hold();
    let worker_bridge = bridge.clone();

    let spawned = bridge.spawn(move || {
        let result = job();
        let bridge = worker_bridge;
        let sent = queue.send(move |env: &dyn HostEnv| {
            settle(env, &bridge, deferred, result, &returns);
        });
        if sent.is_err() {
            tracing::warn!("host loop gone, async result dropped");
        }
        drop(hold);
    });

    if let Err(e) = spawned {
        let reason = e.to_host(env);
        let _ = env.reject_deferred(deferred, reason);
        return Err(e);
    }
    Ok(promise)
}

fn settle(
    env: &dyn HostEnv,
    bridge: &Bridge,
    deferred: Deferred,
    result: BridgeResult<NativeValue>,
    returns: &TypeTag,
) {
    let encoded = result.and_then(|value| {
        bridge
            .codec(env)
            .encode(&value, returns)
            .map_err(|e| e.within(PathSegment::Return))
    });
    let settled = match encoded {
        Ok(value) => env.resolve_deferred(deferred, value),
        Err(error) => env.reject_deferred(deferred, error.to_host(env)),
    };
    if settled.is_err() {
        tracing::warn!("failed to settle async promise");
    }
}

/// Pin every handle reachable from the bound arguments
pub(crate) fn pin_arguments(bridge: &Bridge, args: &[NativeValue]) -> BridgeResult<Vec<PinGuard>> {
    fn collect(value: &NativeValue, bridge: &Bridge, pins: &mut Vec<PinGuard>) -> BridgeResult<()> {
        match value {
            NativeValue::Pointer(handle) => pins.push(bridge.handles().pin(*handle)?),
            NativeValue::Optional(Some(inner)) => collect(inner, bridge, pins)?,
            NativeValue::Array(items) => {
                for item in items {
                    collect(item, bridge, pins)?;
                }
            }
            NativeValue::Struct(fields) => {
                for (_, field) in fields {
                    collect(field, bridge, pins)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    let mut pins = Vec::new();
    for arg in args {
        collect(arg, bridge, &mut pins)?;
    }
    Ok(pins)
}

/// Run `f`, turning a panic into [`BridgeError::Panic`]
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> BridgeResult<R>) -> BridgeResult<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(%message, "native function panicked");
        Err(BridgeError::Panic(message))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
