//! Shared test addon and harness helpers
//!
//! The addon mirrors what a real native module exports: plain functions with
//! serialized parameters, callbacks, async work, collection accessors, an
//! explicitly built class, classes wrapped by convention and plain values.

#![allow(dead_code)]

use std::thread;
use std::time::Duration;

use serde_json::Value;
use tether_engine::{Runtime, RuntimeConfig};
use tether_native::{function, methods, Reflect};
use tether_sdk::{
    Allocator, AsyncTask, Bridge, BridgeError, BridgeResult, CallContext, ClassBuilder, FromNative, FunctionDescriptor,
    HostError, HostEnv, HostFunction, HostValue, IntoNative, NativeModule, NativeValue, ThreadsafeCallback,
    TypeTag,
};

// ============================================================================
// Functions
// ============================================================================

pub mod functions {
    use super::*;

    #[function]
    fn fn_with_serialized_params(int: i32, flag: bool) -> i32 {
        if flag {
            int + 333
        } else {
            int
        }
    }

    #[function]
    fn fn_with_allocator_param(allocator: Allocator, len: u32) -> String {
        allocator.alloc_string(len as usize, 'A')
    }

    #[function(worker)]
    fn async_function(value: u32) -> u32 {
        thread::sleep(Duration::from_millis(5));
        value + 256
    }

    #[function]
    fn fn_callback(ctx: &mut CallContext<'_>, value: i32, callback: HostFunction) -> BridgeResult<i32> {
        let result = ctx.invoke(callback, &[value.into_native()], &TypeTag::I32)?;
        i32::from_native(result)
    }

    #[function(name = "failing")]
    fn always_fails(reason: String) -> Result<u32, String> {
        Err(format!("failed: {}", reason))
    }

    /// Calls `callback(i)` from one worker thread for every `i` in
    /// `0..count`, queueing without waiting.
    #[function]
    fn call_from_worker(ctx: &mut CallContext<'_>, callback: HostFunction, count: u32) -> BridgeResult<()> {
        let callback = ctx.threadsafe(callback, TypeTag::Void)?;
        thread::spawn(move || {
            for i in 0..count {
                let _ = callback.call_async(vec![NativeValue::U32(i)]);
            }
        });
        Ok(())
    }

    /// Calls `callback(i)` from a worker, blocking on each result, and
    /// reports the sum of the results to `done`.
    #[function]
    fn sum_from_worker(
        ctx: &mut CallContext<'_>,
        callback: HostFunction,
        done: HostFunction,
        count: u32,
    ) -> BridgeResult<()> {
        let callback: ThreadsafeCallback = ctx.threadsafe(callback, TypeTag::U32)?;
        let done = ctx.threadsafe(done, TypeTag::Void)?;
        thread::spawn(move || {
            let mut sum = 0u32;
            for i in 0..count {
                if let Ok(NativeValue::U32(n)) = callback.call(vec![NativeValue::U32(i)]) {
                    sum += n;
                }
            }
            let _ = done.call(vec![NativeValue::U32(sum)]);
        });
        Ok(())
    }

    pub fn module() -> NativeModule {
        NativeModule::new("functions")
            .function(fn_with_serialized_params_native())
            .function(fn_with_allocator_param_native())
            .function(async_function_native())
            .function(fn_callback_native())
            .function(always_fails_native())
            .function(call_from_worker_native())
            .function(sum_from_worker_native())
    }
}

// ============================================================================
// Serialization
// ============================================================================

pub mod serialization {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Reflect)]
    pub struct Nested {
        pub int: i32,
        pub str: String,
    }

    #[derive(Debug, Clone, PartialEq, Reflect)]
    pub struct Outer {
        pub int: i32,
        pub nested: Nested,
        pub str: String,
    }

    #[derive(Debug, Clone, PartialEq, Reflect)]
    pub struct WithOptional {
        pub id: u32,
        pub label: Option<String>,
    }

    #[function]
    fn serialize_string() -> String {
        "foo".to_string()
    }

    #[function]
    fn serialize_bool() -> bool {
        true
    }

    #[function]
    fn serialize_i32() -> i32 {
        32
    }

    #[function]
    fn serialize_i64() -> i64 {
        64
    }

    #[function]
    fn serialize_big_i64() -> i64 {
        i64::MAX
    }

    #[function]
    fn serialize_u32() -> u32 {
        32
    }

    #[function]
    fn serialize_u64() -> u64 {
        64
    }

    #[function]
    fn serialize_void() {}

    #[function]
    fn serialize_optional_null() -> Option<u32> {
        None
    }

    #[function]
    fn serialize_optional_with_value() -> Option<u32> {
        Some(123)
    }

    #[function]
    fn serialize_struct() -> Outer {
        Outer {
            int: 123,
            nested: Nested {
                int: 456,
                str: "nested".to_string(),
            },
            str: "first".to_string(),
        }
    }

    #[function]
    fn serialize_tuple() -> (i32, String, bool) {
        (7, "seven".to_string(), true)
    }

    #[function]
    fn deserialize_i32(value: i32) -> i32 {
        value
    }

    #[function]
    fn deserialize_i64(value: i64) -> i64 {
        value
    }

    #[function]
    fn deserialize_u8(value: u8) -> u8 {
        value
    }

    #[function]
    fn deserialize_u32(value: u32) -> u32 {
        value
    }

    #[function]
    fn deserialize_u64(value: u64) -> u64 {
        value
    }

    #[function]
    fn deserialize_f32(value: f32) -> f32 {
        value
    }

    #[function]
    fn deserialize_string(value: String) -> String {
        value
    }

    #[function]
    fn deserialize_optional(value: Option<u32>) -> Option<u32> {
        value
    }

    #[function]
    fn deserialize_struct(value: Outer) -> Outer {
        value
    }

    #[function]
    fn deserialize_with_optional(value: WithOptional) -> WithOptional {
        value
    }

    #[function]
    fn deserialize_array(values: Vec<i32>) -> Vec<i32> {
        values
    }

    #[function]
    fn deserialize_tuple(value: (i32, String)) -> (i32, String) {
        value
    }

    pub fn module() -> NativeModule {
        let arr = NativeValue::Array(vec![
            NativeValue::I32(-411),
            NativeValue::I32(12),
            NativeValue::Array(vec![NativeValue::I32(-411), NativeValue::I32(12)]),
            NativeValue::structure([("foo", NativeValue::I32(123))]),
            NativeValue::string("bar"),
        ]);

        NativeModule::new("serialization")
            .function(serialize_string_native())
            .function(serialize_bool_native())
            .function(serialize_i32_native())
            .function(serialize_i64_native())
            .function(serialize_big_i64_native())
            .function(serialize_u32_native())
            .function(serialize_u64_native())
            .function(serialize_void_native())
            .function(serialize_optional_null_native())
            .function(serialize_optional_with_value_native())
            .function(serialize_struct_native())
            .function(serialize_tuple_native())
            .function(deserialize_i32_native())
            .function(deserialize_i64_native())
            .function(deserialize_u8_native())
            .function(deserialize_u32_native())
            .function(deserialize_u64_native())
            .function(deserialize_f32_native())
            .function(deserialize_string_native())
            .function(deserialize_optional_native())
            .function(deserialize_struct_native())
            .function(deserialize_with_optional_native())
            .function(deserialize_array_native())
            .function(deserialize_tuple_native())
            .namespace("serializedValues", NativeModule::new("serializedValues").value("arr", arr))
    }
}

// ============================================================================
// Collections
// ============================================================================

pub mod node_array {
    use super::*;

    #[function]
    fn len(ctx: &mut CallContext<'_>, array: HostValue) -> BridgeResult<u32> {
        Ok(ctx.array(array)?.len()? as u32)
    }

    #[function]
    fn get(ctx: &mut CallContext<'_>, array: HostValue, index: u32) -> BridgeResult<HostValue> {
        ctx.array(array)?.get_at(index as usize)
    }

    #[function]
    fn set(ctx: &mut CallContext<'_>, array: HostValue, index: u32, value: HostValue) -> BridgeResult<HostValue> {
        ctx.array(array)?.set_at(index as usize, value)?;
        Ok(value)
    }

    pub fn module() -> NativeModule {
        NativeModule::new("nodeArray")
            .function(len_native())
            .function(get_native())
            .function(set_native())
    }
}

pub mod node_object {
    use super::*;

    const KEY: &str = "prop";

    #[function]
    fn has(ctx: &mut CallContext<'_>, object: HostValue) -> BridgeResult<bool> {
        ctx.object(object)?.has(KEY)
    }

    #[function]
    fn has_own(ctx: &mut CallContext<'_>, object: HostValue) -> BridgeResult<bool> {
        ctx.object(object)?.has_own(KEY)
    }

    #[function]
    fn get_property_names(ctx: &mut CallContext<'_>, object: HostValue) -> BridgeResult<Vec<String>> {
        ctx.object(object)?.property_names()
    }

    #[function]
    fn get(ctx: &mut CallContext<'_>, object: HostValue) -> BridgeResult<HostValue> {
        ctx.object(object)?.get(KEY)
    }

    #[function]
    fn set(ctx: &mut CallContext<'_>, object: HostValue, value: HostValue) -> BridgeResult<HostValue> {
        ctx.object(object)?.set(KEY, value)?;
        Ok(value)
    }

    #[function]
    fn delete(ctx: &mut CallContext<'_>, object: HostValue) -> BridgeResult<bool> {
        ctx.object(object)?.delete(KEY)
    }

    pub fn module() -> NativeModule {
        NativeModule::new("nodeObject")
            .function(has_native())
            .function(has_own_native())
            .function(get_property_names_native())
            .function(get_native())
            .function(set_native())
            .function(delete_native())
    }
}

// ============================================================================
// Classes
// ============================================================================

/// Explicitly built class backing `addon.TestClass`
pub struct TestClass {
    pub value: u32,
}

pub fn test_class() -> ClassBuilder<TestClass> {
    ClassBuilder::<TestClass>::new("TestClass")
        .constructor(
            FunctionDescriptor::new("constructor").param(TypeTag::U32),
            |_: &mut CallContext<'_>, args: Vec<NativeValue>| {
                let value = u32::from_native(args.into_iter().next().unwrap_or_default())?;
                Ok(TestClass { value })
            },
        )
        .async_method(
            FunctionDescriptor::new("methodAsync")
                .param(TypeTag::U32)
                .param(TypeTag::String)
                .returns(TypeTag::U32),
            |_: &TestClass, args: Vec<NativeValue>| {
                let value = u32::from_native(args.into_iter().next().unwrap_or_default())?;
                let task: AsyncTask = Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                    Ok(value.into_native())
                });
                Ok(task)
            },
        )
        .method_mut(
            FunctionDescriptor::new("increment").returns(TypeTag::U32),
            |_: &mut CallContext<'_>, this: &mut TestClass, _: Vec<NativeValue>| {
                this.value += 1;
                Ok(this.value.into_native())
            },
        )
        .static_method(
            FunctionDescriptor::new("static").param(TypeTag::U32).returns(TypeTag::U32),
            |_: &mut CallContext<'_>, args: Vec<NativeValue>| {
                let value = u32::from_native(args.into_iter().next().unwrap_or_default())?;
                Ok((value * 2).into_native())
            },
        )
        .readonly_field("value", TypeTag::U32, |this: &TestClass| this.value.into_native())
}

/// Class wrapped by convention; exported both as a class and as instances
#[derive(Debug, Clone, Reflect)]
#[reflect(methods)]
pub struct Wrapped {
    pub foo: i32,
    pub bar: String,
    _cache: Vec<u8>,
}

impl Wrapped {
    pub fn with(foo: i32, bar: &str) -> Self {
        Wrapped {
            foo,
            bar: bar.to_string(),
            _cache: Vec::new(),
        }
    }
}

#[methods]
impl Wrapped {
    pub fn method(&self) -> String {
        format!("{} {}", self.bar, self.foo)
    }

    pub fn bump_foo(&mut self, by: i32) -> i32 {
        self.foo += by;
        self.foo
    }

    pub fn make_label(prefix: String) -> String {
        format!("{}-wrapped", prefix)
    }

    fn hidden(&self) -> i32 {
        self.foo
    }
}

// ============================================================================
// Modules
// ============================================================================

/// The full test addon
pub fn addon() -> NativeModule {
    NativeModule::new("addon")
        .namespace("functions", functions::module())
        .namespace("serialization", serialization::module())
        .namespace("nodeArray", node_array::module())
        .namespace("nodeObject", node_object::module())
        .class(test_class().build())
        .class(ClassBuilder::<Wrapped>::by_convention("Wrapped").build())
        .instance("wrappedInstance", "Wrapped", Wrapped::with(123, "hopla"))
        .instance("wrappedByConvention", "Wrapped", Wrapped::with(0, "convention"))
}

/// Module whose exports are only plain values
pub fn export_object() -> NativeModule {
    NativeModule::new("exportObject")
        .value("foo", NativeValue::string("foo"))
        .value("bar", NativeValue::I32(123))
}

/// Module exporting a single class defined by convention
pub mod export_class {
    use super::*;

    #[derive(Clone, Reflect)]
    #[reflect(methods)]
    pub struct TestClass {}

    #[methods]
    impl TestClass {
        pub fn new() -> Self {
            TestClass {}
        }

        pub fn method(&self) -> String {
            "method".to_string()
        }

        pub fn r#static() -> String {
            "static".to_string()
        }
    }

    pub fn module() -> NativeModule {
        NativeModule::new("exportClass").class(ClassBuilder::<TestClass>::by_convention("TestClass").build())
    }
}

/// Module using an injected allocator
pub mod allocators {
    use super::*;

    #[derive(Debug, Clone, Reflect)]
    pub struct EncryptOptions {
        pub char: u8,
    }

    #[function]
    fn encrypt(allocator: Allocator, text: String, options: EncryptOptions) -> BridgeResult<String> {
        let ch = char::from(options.char);
        if !ch.is_ascii() {
            return Err(BridgeError::Native(format!("{} is not an ASCII character", options.char)));
        }
        Ok(allocator.alloc_string(text.chars().count(), ch))
    }

    pub fn module() -> NativeModule {
        NativeModule::new("allocators").function(encrypt_native())
    }
}

/// Module with a `register` entry point generated by `#[module]`
pub mod sample {
    use tether_native::{methods, module, Reflect};
    use tether_sdk::{ClassBuilder, NativeModule};

    #[derive(Clone, Reflect)]
    #[reflect(methods)]
    pub struct C {
        pub calls: u32,
    }

    #[methods]
    impl C {
        pub fn new() -> Self {
            C { calls: 0 }
        }

        pub fn call_me(&mut self, value: i32) -> i32 {
            self.calls += 1;
            value
        }
    }

    #[module]
    fn init() -> NativeModule {
        NativeModule::new("sample").class(ClassBuilder::<C>::by_convention("C").build())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A runtime with a loaded module
pub struct Harness {
    pub rt: Runtime,
    pub bridge: Bridge,
    pub exports: HostValue,
}

impl Harness {
    pub fn new(module: NativeModule) -> Self {
        Self::with_config(module, RuntimeConfig::default())
    }

    pub fn with_config(module: NativeModule, config: RuntimeConfig) -> Self {
        init_tracing();
        let rt = Runtime::with_config(config);
        let bridge = Bridge::new();
        let exports = rt.load_module(&module, &bridge).expect("module registers");
        Harness { rt, bridge, exports }
    }

    /// `exports.<path>` where `path` is dot-separated
    pub fn export(&self, path: &str) -> HostValue {
        path.split('.').fold(self.exports, |value, key| {
            self.rt.get(value, key).expect("export lookup")
        })
    }

    /// Call `exports.<path>(...args)` with `this` set to its namespace
    pub fn call(&self, path: &str, args: &[HostValue]) -> Result<HostValue, HostError> {
        let (namespace, name) = match path.rsplit_once('.') {
            Some((ns, name)) => (self.export(ns), name),
            None => (self.exports, path),
        };
        self.rt.call_method(namespace, name, args)
    }

    pub fn json(&self, value: HostValue) -> Value {
        self.rt.to_json(value).expect("json snapshot")
    }

    pub fn value(&self, json: Value) -> HostValue {
        self.rt.from_json(&json).expect("json value")
    }

    pub fn string(&self, s: &str) -> HostValue {
        self.rt.string(s)
    }

    /// Exception name and message of a failed call
    pub fn thrown(&self, error: HostError) -> (String, String) {
        match error {
            HostError::Exception(value) => {
                let name = self.rt.get(value, "name").expect("name");
                let message = self.rt.get(value, "message").expect("message");
                (
                    self.rt.to_rust_string(name).unwrap_or_default(),
                    self.rt.to_rust_string(message).unwrap_or_default(),
                )
            }
            other => panic!("expected a host exception, got {:?}", other),
        }
    }
}

pub fn num(n: f64) -> HostValue {
    HostValue::Number(n)
}

/// Host function recording every first argument into `log`
pub fn recorder(rt: &Runtime, log: HostValue) -> HostValue {
    rt.function("record", move |env: &dyn HostEnv, frame| {
        let len = env.array_len(log).map_err(|_| HostValue::Undefined)?;
        env.array_set(log, len, frame.arg(0)).map_err(|_| HostValue::Undefined)?;
        Ok(HostValue::Undefined)
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
