//! Threadsafe Callback Tests
//!
//! Host functions called from worker threads through the call queue, and
//! deferred calls resolved as futures.

mod common;

use std::thread;

use common::{num, recorder, Harness};
use serde_json::json;
use tether_engine::{Runtime, RuntimeConfig};
use tether_sdk::{
    invoke_async, Bridge, BridgeError, HostEnv, HostFunction, HostValue, NativeValue, ThreadsafeCallback,
    TypeTag,
};

fn harness() -> Harness {
    Harness::new(common::functions::module())
}

// ===== Worker threads =====

#[test]
fn test_calls_from_worker_run_in_order() {
    let h = harness();
    let log = h.value(json!([]));
    let record = recorder(&h.rt, log);

    h.call("callFromWorker", &[record, num(20.0)]).unwrap();
    h.rt.run_until_idle().unwrap();

    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(h.json(log), json!(expected));
}

#[test]
fn test_blocking_calls_from_worker_return_results() {
    let h = harness();
    let double = h.rt.function("double", |_: &dyn HostEnv, frame| {
        Ok(HostValue::Number(frame.arg(0).as_number().unwrap_or(0.0) * 2.0))
    });
    let log = h.value(json!([]));
    let done = recorder(&h.rt, log);

    h.call("sumFromWorker", &[double, done, num(5.0)]).unwrap();
    h.rt.run_until_idle().unwrap();

    assert_eq!(h.json(log), json!([20]));
}

#[test]
fn test_worker_calls_keep_the_loop_alive() {
    let h = harness();
    let log = h.value(json!([]));
    let record = recorder(&h.rt, log);

    h.call("callFromWorker", &[record, num(3.0)]).unwrap();
    h.call("callFromWorker", &[record, num(3.0)]).unwrap();
    h.rt.run_until_idle().unwrap();

    assert_eq!(h.rt.array_len(log).unwrap(), 6);
    assert_eq!(h.rt.call_queue().outstanding(), 0);
}

#[test]
fn test_blocking_call_on_host_thread_is_rejected() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let noop = rt.function("noop", |_: &dyn HostEnv, _| Ok(HostValue::Undefined));
    let function = HostFunction::from_host(&rt, noop).unwrap();
    let callback = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::Void).unwrap();

    let error = callback.call(vec![]).unwrap_err();
    assert!(matches!(error, BridgeError::Host(_)), "{:?}", error);

    drop(callback);
    rt.run_until_idle().unwrap();
}

#[test]
fn test_threadsafe_callback_from_spawned_thread() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let add = rt.function("add", |_: &dyn HostEnv, frame| {
        let a = frame.arg(0).as_number().unwrap_or(0.0);
        let b = frame.arg(1).as_number().unwrap_or(0.0);
        Ok(HostValue::Number(a + b))
    });
    let function = HostFunction::from_host(&rt, add).unwrap();
    let callback = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::I32).unwrap();

    let worker = thread::spawn(move || callback.call(vec![NativeValue::I32(40), NativeValue::I32(2)]));
    rt.run_until_idle().unwrap();
    let result = worker.join().unwrap().unwrap();
    assert!(matches!(result, NativeValue::I32(42)));
}

#[test]
fn test_worker_call_allocations_are_collected() {
    let rt = Runtime::with_config(RuntimeConfig::manual_gc());
    let bridge = Bridge::new();
    let boxed = rt.function("boxed", |env: &dyn HostEnv, frame| {
        let object = env.create_object().map_err(|_| HostValue::Undefined)?;
        env.set_property(object, "value", frame.arg(0)).map_err(|_| HostValue::Undefined)?;
        Ok(HostValue::Undefined)
    });
    let function = HostFunction::from_host(&rt, boxed).unwrap();
    let callback = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::Void).unwrap();
    rt.collect_garbage();
    let baseline = rt.live_objects();

    let worker = thread::spawn(move || {
        for i in 0..50 {
            callback.call_async(vec![NativeValue::U32(i)]).unwrap();
        }
    });
    worker.join().unwrap();
    rt.run_until_idle().unwrap();

    rt.collect_garbage();
    assert_eq!(rt.live_objects(), baseline);
}

#[test]
fn test_deferred_calls_reject_host_valued_results() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let noop = rt.function("noop", |_: &dyn HostEnv, _| Ok(HostValue::Undefined));
    let function = HostFunction::from_host(&rt, noop).unwrap();

    let error = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::Dynamic).unwrap_err();
    assert_eq!(error.name(), "TypeMismatch");
    let error = invoke_async(&rt, &bridge, function, vec![], TypeTag::array(TypeTag::Function)).unwrap_err();
    assert_eq!(error.name(), "TypeMismatch");
}

// ===== Futures =====

#[tokio::test]
async fn test_invoke_async_resolves_after_microtasks() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let square = rt.function("square", |_: &dyn HostEnv, frame| {
        let n = frame.arg(0).as_number().unwrap_or(0.0);
        Ok(HostValue::Number(n * n))
    });
    let function = HostFunction::from_host(&rt, square).unwrap();

    let future = invoke_async(&rt, &bridge, function, vec![NativeValue::F64(7.0)], TypeTag::F64).unwrap();
    assert_eq!(rt.run_microtasks(), 1);
    let result = future.await.unwrap();
    assert!(matches!(result, NativeValue::F64(n) if n == 49.0));
}

#[tokio::test]
async fn test_invoke_async_reports_thrown_errors() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let thrower = rt.function("thrower", |env: &dyn HostEnv, _| {
        Err(env.create_error("Error", "deferred failure").unwrap_or(HostValue::Undefined))
    });
    let function = HostFunction::from_host(&rt, thrower).unwrap();

    let future = invoke_async(&rt, &bridge, function, vec![], TypeTag::Void).unwrap();
    rt.run_microtasks();
    let error = future.await.unwrap_err();
    assert_eq!(error.name(), "Error");
    assert_eq!(error.to_string(), "deferred failure");
}

#[tokio::test]
async fn test_threadsafe_call_async_resolves_after_dispatch() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let echo = rt.function("echo", |_: &dyn HostEnv, frame| Ok(frame.arg(0)));
    let function = HostFunction::from_host(&rt, echo).unwrap();
    let callback = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::String).unwrap();

    let future = callback.call_async(vec![NativeValue::string("queued")]).unwrap();
    drop(callback);
    rt.run_until_idle().unwrap();

    let result = future.await.unwrap();
    assert!(matches!(result, NativeValue::String(ref s) if s == "queued"));
}

#[tokio::test]
async fn test_future_fails_when_runtime_is_dropped() {
    let bridge = Bridge::new();
    let future = {
        let rt = Runtime::new();
        let noop = rt.function("noop", |_: &dyn HostEnv, _| Ok(HostValue::Undefined));
        let function = HostFunction::from_host(&rt, noop).unwrap();
        invoke_async(&rt, &bridge, function, vec![], TypeTag::Void).unwrap()
    };
    let error = future.await.unwrap_err();
    assert!(matches!(error, BridgeError::Host(_)), "{:?}", error);
}

#[tokio::test]
async fn test_thrown_value_outlives_the_queued_call() {
    let rt = Runtime::with_config(RuntimeConfig::manual_gc());
    let bridge = Bridge::new();
    let thrower = rt.function("thrower", |env: &dyn HostEnv, _| {
        Err(env.create_error("TypeError", "queued failure").unwrap_or(HostValue::Undefined))
    });
    let function = HostFunction::from_host(&rt, thrower).unwrap();
    let callback = ThreadsafeCallback::new(&rt, &bridge, function, TypeTag::Void).unwrap();

    let future = callback.call_async(vec![]).unwrap();
    drop(callback);
    rt.run_until_idle().unwrap();
    rt.collect_garbage();

    let error = future.await.unwrap_err();
    let thrown = error.to_host(&rt);
    assert!(rt.is_alive(thrown));
    assert_eq!(rt.to_rust_string(rt.get(thrown, "message").unwrap()).unwrap(), "queued failure");

    drop(error);
    rt.run_until_idle().unwrap();
    rt.collect_garbage();
    assert!(!rt.is_alive(thrown));
}
