//! CallbackBridge — calling host functions from native code
//!
//! - [`invoke`]: synchronous call on the host thread (re-entrant).
//! - [`invoke_async`]: queued as a microtask, resolved through a future.
//! - [`ThreadsafeCallback`]: callable from worker threads through the
//!   host's FIFO call queue.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::bridge::Bridge;
use crate::context::{HostEnv, ReferenceId};
use crate::error::{BridgeError, BridgeResult, PathSegment, ValuePath};
use crate::queue::{CallQueue, LoopHold};
use crate::value::{HostFunction, HostValue, NativeValue, TypeTag, ValueKind};

impl HostFunction {
    /// Check that `value` is a host function
    pub fn from_host(env: &dyn HostEnv, value: HostValue) -> BridgeResult<Self> {
        match env.kind_of(value) {
            ValueKind::Function => Ok(HostFunction::new(value)),
            got => Err(BridgeError::FunctionExpected {
                at: ValuePath::root(),
                got,
            }),
        }
    }
}

/// Call `function` synchronously.
///
/// Arguments are encoded with the types inferred from their variants; the
/// result is decoded as `returns`. A host exception becomes
/// [`BridgeError::Thrown`] carrying the original message and value.
pub fn invoke(
    env: &dyn HostEnv,
    bridge: &Bridge,
    function: HostFunction,
    args: &[NativeValue],
    returns: &TypeTag,
) -> BridgeResult<NativeValue> {
    let codec = bridge.codec(env);
    let host_args = args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            codec
                .encode_inferred(arg)
                .map_err(|e| e.within(PathSegment::Argument(i)))
        })
        .collect::<BridgeResult<Vec<_>>>()?;

    tracing::trace!(args = host_args.len(), "invoking host callback");
    let result = env
        .call_function(function.value(), HostValue::Undefined, &host_args)
        .map_err(|e| BridgeError::from_host(env, e))?;

    codec
        .decode(result, returns)
        .map_err(|e| e.within(PathSegment::Return))
}

/// Schedule a call to `function` as a microtask.
///
/// Never blocks. The function is kept alive by a strong reference until the
/// microtask has run. A thrown value reaching the future is persisted.
pub fn invoke_async(
    env: &dyn HostEnv,
    bridge: &Bridge,
    function: HostFunction,
    args: Vec<NativeValue>,
    returns: TypeTag,
) -> BridgeResult<CallbackFuture> {
    check_deferred_return(&returns)?;
    let reference = env
        .create_reference(function.value(), 1)
        .map_err(|e| BridgeError::from_host(env, e))?;
    let (tx, rx) = oneshot::channel();
    let bridge = bridge.clone();

    env.enqueue_microtask(Box::new(move |env: &dyn HostEnv| {
        let result = call_referenced(env, &bridge, reference, &args, &returns).map_err(|e| e.persist(env));
        let _ = env.delete_reference(reference);
        let _ = tx.send(result);
    }));

    Ok(CallbackFuture { rx })
}

/// Results of deferred calls outlive the scope they were decoded in, so
/// they must not carry bare host values.
fn check_deferred_return(returns: &TypeTag) -> BridgeResult<()> {
    if returns.holds_host_values() {
        let error = BridgeError::TypeMismatch {
            at: ValuePath::root(),
            expected: "a value that can outlive the call".to_string(),
            got: returns.to_string(),
        };
        return Err(error.within(PathSegment::Return));
    }
    Ok(())
}

fn call_referenced(
    env: &dyn HostEnv,
    bridge: &Bridge,
    reference: ReferenceId,
    args: &[NativeValue],
    returns: &TypeTag,
) -> BridgeResult<NativeValue> {
    match env.reference_value(reference) {
        Ok(Some(function)) => invoke(env, bridge, HostFunction::new(function), args, returns),
        Ok(None) => Err(BridgeError::Host("callback was collected".to_string())),
        Err(e) => Err(BridgeError::from_host(env, e)),
    }
}

/// Result of a deferred host call
pub struct CallbackFuture {
    rx: oneshot::Receiver<BridgeResult<NativeValue>>,
}

impl Future for CallbackFuture {
    type Output = BridgeResult<NativeValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(BridgeError::Host(
                    "host loop dropped the call before it ran".to_string(),
                ))
            })
        })
    }
}

impl fmt::Debug for CallbackFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackFuture")
    }
}

// ============================================================================
// Thread-safe callbacks
// ============================================================================

struct ThreadsafeInner {
    reference: ReferenceId,
    queue: CallQueue,
    bridge: Bridge,
    returns: TypeTag,
    _hold: LoopHold,
}

impl Drop for ThreadsafeInner {
    fn drop(&mut self) {
        let reference = self.reference;
        let released = self.queue.send(move |env: &dyn HostEnv| {
            let _ = env.delete_reference(reference);
        });
        if released.is_err() {
            tracing::warn!("host loop gone, threadsafe callback reference leaked");
        }
    }
}

/// Host function callable from any thread.
///
/// Calls are queued on the host's call queue and run one at a time in
/// enqueue order. While any clone is alive the host loop is kept running;
/// dropping the last clone releases the function on the host thread.
#[derive(Clone)]
pub struct ThreadsafeCallback {
    inner: Arc<ThreadsafeInner>,
}

impl ThreadsafeCallback {
    /// Wrap `function`; must be called on the host thread.
    ///
    /// `returns` may not contain host functions or dynamic values.
    pub fn new(
        env: &dyn HostEnv,
        bridge: &Bridge,
        function: HostFunction,
        returns: TypeTag,
    ) -> BridgeResult<Self> {
        check_deferred_return(&returns)?;
        let reference = env
            .create_reference(function.value(), 1)
            .map_err(|e| BridgeError::from_host(env, e))?;
        let queue = env.call_queue();
        let hold = queue.hold();
        Ok(Self {
            inner: Arc::new(ThreadsafeInner {
                reference,
                queue,
                bridge: bridge.clone(),
                returns,
                _hold: hold,
            }),
        })
    }

    fn enqueue(&self, args: Vec<NativeValue>) -> BridgeResult<oneshot::Receiver<BridgeResult<NativeValue>>> {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.inner.queue.send(move |env: &dyn HostEnv| {
            let result = call_referenced(env, &inner.bridge, inner.reference, &args, &inner.returns)
                .map_err(|e| e.persist(env));
            let _ = tx.send(result);
        })?;
        Ok(rx)
    }

    /// Call and block until the host loop has run the call.
    ///
    /// Fails on the host thread itself, which would wait on its own loop.
    pub fn call(&self, args: Vec<NativeValue>) -> BridgeResult<NativeValue> {
        if self.inner.queue.is_host_thread() {
            return Err(BridgeError::Host(
                "blocking threadsafe call on the host thread would deadlock".to_string(),
            ));
        }
        let rx = self.enqueue(args)?;
        rx.blocking_recv().unwrap_or_else(|_| {
            Err(BridgeError::Host(
                "host loop dropped the call before it ran".to_string(),
            ))
        })
    }

    /// Queue a call and return a future for its result
    pub fn call_async(&self, args: Vec<NativeValue>) -> BridgeResult<CallbackFuture> {
        Ok(CallbackFuture {
            rx: self.enqueue(args)?,
        })
    }
}

impl fmt::Debug for ThreadsafeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadsafeCallback")
            .field("reference", &self.inner.reference)
            .field("returns", &self.inner.returns)
            .finish()
    }
}
