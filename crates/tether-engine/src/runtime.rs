//! Runtime - the in-process host
//!
//! [`Runtime`] owns a heap, a microtask queue and the receiving side of the
//! thread-safe call queue, and implements [`HostEnv`] on top of them. It is
//! single-threaded: every method must be called on the thread that created
//! it. Worker threads reach it only through [`HostEnv::call_queue`].
//!
//! Internal state sits behind a `RefCell`. No borrow is held while host code
//! runs (native callbacks, getters, setters, finalizers, microtasks), so any
//! of them may re-enter the runtime.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tether_sdk::queue::{self, CallReceiver};
use tether_sdk::{
    Bridge, CallFrame, CallQueue, ClassDefinition, Deferred, Finalizer, HeapRef, HostCallback, HostEnv, HostError,
    HostResult, HostValue, Microtask, NativeModule, ReferenceId, ValueKind,
};

use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::gc::{self, GcStats, RootSet};
use crate::heap::{FunctionData, Heap, HeapData, ObjectData, ObjectKind, PromiseState, Property, Wrap};

struct RefEntry {
    /// `None` once a weakly-held value was collected
    value: Option<HostValue>,
    count: u32,
}

struct State {
    heap: Heap,
    roots: RootSet,
    references: FxHashMap<u64, RefEntry>,
    next_reference: u64,
    deferreds: FxHashMap<u64, HeapRef>,
    next_deferred: u64,
    stats: GcStats,
}

/// Result of a property lookup along the prototype chain
enum Lookup {
    Value(HostValue),
    Accessor {
        getter: Option<HostValue>,
        setter: Option<HostValue>,
    },
    Missing,
}

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse().ok()
}

/// Single-threaded garbage-collected host runtime
pub struct Runtime {
    state: RefCell<State>,
    microtasks: RefCell<VecDeque<Microtask>>,
    queue: CallQueue,
    receiver: CallReceiver,
    config: RuntimeConfig,
    global: HeapRef,
    call_depth: Cell<usize>,
    collecting: Cell<bool>,
    external_memory: Cell<i64>,
}

impl Runtime {
    /// Runtime with the default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Runtime with the given configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut heap = Heap::new();
        let global = heap.allocate(HeapData::Object(ObjectData::new(ObjectKind::Plain, None)));
        let mut roots = RootSet::new();
        roots.add_global(global);

        let (queue, receiver) = queue::channel();
        tracing::debug!(?config, "runtime created");
        Runtime {
            state: RefCell::new(State {
                heap,
                roots,
                references: FxHashMap::default(),
                next_reference: 1,
                deferreds: FxHashMap::default(),
                next_deferred: 1,
                stats: GcStats::default(),
            }),
            microtasks: RefCell::new(VecDeque::new()),
            queue,
            receiver,
            config,
            global,
            call_depth: Cell::new(0),
            collecting: Cell::new(false),
            external_memory: Cell::new(0),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The global object
    pub fn global(&self) -> HostValue {
        HostValue::Ref(self.global)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn root(&self, value: HostValue) {
        if let Some(r) = value.heap_ref() {
            self.state.borrow_mut().roots.add_scoped(r);
        }
    }

    fn allocate(&self, data: HeapData) -> HostValue {
        let mut state = self.state.borrow_mut();
        let r = state.heap.allocate(data);
        state.roots.add_scoped(r);
        HostValue::Ref(r)
    }

    fn allocate_object(&self, kind: ObjectKind, prototype: Option<HeapRef>) -> HostValue {
        self.allocate(HeapData::Object(ObjectData::new(kind, prototype)))
    }

    fn heap_ref(value: HostValue) -> HostResult<HeapRef> {
        value
            .heap_ref()
            .ok_or_else(|| HostError::InvalidArg(format!("expected a heap value, got {:?}", value)))
    }

    /// Longest array this runtime stores
    fn max_array_length(&self) -> usize {
        self.config.max_array_length.min(crate::defaults::MAX_ARRAY_LENGTH)
    }

    fn set_array_length(&self, r: HeapRef, value: HostValue) -> HostResult<()> {
        let len = value
            .as_number()
            .filter(|n| *n >= 0.0 && n.fract() == 0.0)
            .ok_or_else(|| HostError::InvalidArg("invalid array length".to_string()))?;
        if len > self.max_array_length() as f64 {
            return Err(self.throw("RangeError", "Invalid array length"));
        }
        if let ObjectKind::Array(elements) = &mut self.state.borrow_mut().heap.object_mut(r)?.kind {
            elements.resize(len as usize, HostValue::Undefined);
        }
        Ok(())
    }

    /// Throw a fresh error object
    fn throw(&self, name: &str, message: &str) -> HostError {
        match self.create_error(name, message) {
            Ok(error) => HostError::Exception(error),
            Err(e) => e,
        }
    }

    fn define_own(&self, object: HostValue, key: &str, property: Property) -> HostResult<()> {
        let r = Self::heap_ref(object)?;
        self.state.borrow_mut().heap.object_mut(r)?.define(key, property);
        Ok(())
    }

    fn lookup(&self, object: HostValue, key: &str) -> HostResult<Lookup> {
        let state = self.state.borrow();
        let mut current = Self::heap_ref(object)?;
        loop {
            let data = state.heap.object(current)?;
            if let Some(elements) = data.elements() {
                if key == "length" {
                    return Ok(Lookup::Value(HostValue::Number(elements.len() as f64)));
                }
                if let Some(index) = array_index(key) {
                    if index < elements.len() {
                        return Ok(Lookup::Value(elements[index]));
                    }
                }
            }
            match data.find(key) {
                Some(Property::Data(value)) => return Ok(Lookup::Value(*value)),
                Some(Property::Accessor { getter, setter }) => {
                    return Ok(Lookup::Accessor {
                        getter: *getter,
                        setter: *setter,
                    })
                }
                None => match data.prototype {
                    Some(prototype) => current = prototype,
                    None => return Ok(Lookup::Missing),
                },
            }
        }
    }

    fn function_data(&self, function: HostValue) -> HostResult<(HostCallback, String)> {
        let r = Self::heap_ref(function)?;
        let state = self.state.borrow();
        match &state.heap.object(r)?.kind {
            ObjectKind::Function(f) => Ok((f.callback.clone(), f.name.clone())),
            _ => Err(HostError::InvalidArg("value is not a function".to_string())),
        }
    }

    /// Run a native callback inside its own handle scope
    fn invoke(&self, name: &str, callback: HostCallback, frame: CallFrame) -> HostResult<HostValue> {
        let depth = self.call_depth.get();
        if depth >= self.config.max_call_depth {
            return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
        }

        tracing::trace!(function = %name, depth, args = frame.args.len(), "calling");
        {
            let mut state = self.state.borrow_mut();
            state.roots.open_scope();
            for value in frame.args.iter().chain([&frame.this, &frame.new_target]) {
                if let Some(r) = value.heap_ref() {
                    state.roots.add_scoped(r);
                }
            }
        }
        self.call_depth.set(depth + 1);
        let result = callback(self as &dyn HostEnv, &frame);
        self.call_depth.set(depth);
        self.state.borrow_mut().roots.close_scope();

        match result {
            Ok(value) => {
                self.root(value);
                Ok(value)
            }
            Err(thrown) => {
                self.root(thrown);
                Err(HostError::Exception(thrown))
            }
        }
    }

    /// Collect if enough was allocated and no native call is running
    fn safe_point(&self) {
        let threshold = self.config.gc_threshold;
        if threshold == 0 || self.call_depth.get() > 0 {
            return;
        }
        let allocated = self.state.borrow().heap.allocated_since_gc();
        if allocated >= threshold.max(crate::defaults::MIN_GC_THRESHOLD) {
            self.collect_garbage();
        }
    }

    // ========================================================================
    // Script-side API
    // ========================================================================

    /// Allocate a string
    pub fn string(&self, s: &str) -> HostValue {
        self.allocate(HeapData::String(s.as_bytes().to_vec()))
    }

    /// Allocate a big-integer
    pub fn bigint(&self, value: i128) -> HostValue {
        self.allocate(HeapData::BigInt(value))
    }

    /// Allocate an empty plain object
    pub fn object(&self) -> HostValue {
        self.allocate_object(ObjectKind::Plain, None)
    }

    /// Allocate an array holding `elements`
    pub fn array(&self, elements: &[HostValue]) -> HostValue {
        self.allocate_object(ObjectKind::Array(elements.to_vec()), None)
    }

    /// Create a host function from a Rust closure
    pub fn function(
        &self,
        name: &str,
        f: impl Fn(&dyn HostEnv, &CallFrame) -> Result<HostValue, HostValue> + 'static,
    ) -> HostValue {
        let callback: HostCallback = Rc::new(f);
        self.allocate_object(
            ObjectKind::Function(FunctionData {
                name: name.to_string(),
                callback,
            }),
            None,
        )
    }

    /// Read a property (alias of [`HostEnv::get_property`])
    pub fn get(&self, object: HostValue, key: &str) -> HostResult<HostValue> {
        self.get_property(object, key)
    }

    /// Write a property (alias of [`HostEnv::set_property`])
    pub fn set(&self, object: HostValue, key: &str, value: HostValue) -> HostResult<()> {
        self.set_property(object, key, value)
    }

    /// Call `function` with `this` bound to `this`
    pub fn call(&self, function: HostValue, this: HostValue, args: &[HostValue]) -> HostResult<HostValue> {
        self.call_function(function, this, args)
    }

    /// Call the method `name` of `object`
    pub fn call_method(&self, object: HostValue, name: &str, args: &[HostValue]) -> HostResult<HostValue> {
        let method = self.get_property(object, name)?;
        self.call_function(method, object, args)
    }

    /// Construct with `new`: a fresh object whose prototype is
    /// `constructor.prototype` is passed as `this`
    pub fn construct(&self, constructor: HostValue, args: &[HostValue]) -> HostResult<HostValue> {
        let (callback, name) = self.function_data(constructor)?;
        let prototype = self.get_property(constructor, "prototype")?;
        let this = self.create_object_with_prototype(prototype)?;
        let frame = CallFrame {
            this,
            args: args.to_vec(),
            new_target: constructor,
        };
        let result = self.invoke(&name, callback, frame)?;
        if self.kind_of(result).is_object_like() {
            Ok(result)
        } else {
            Ok(this)
        }
    }

    /// Decode a string value to Rust, replacing invalid UTF-8
    pub fn to_rust_string(&self, value: HostValue) -> HostResult<String> {
        let bytes = self.read_string(value)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Settlement state of a promise, `None` for non-promises
    pub fn promise_state(&self, value: HostValue) -> Option<PromiseState> {
        let r = value.heap_ref()?;
        let state = self.state.borrow();
        match &state.heap.object(r).ok()?.kind {
            ObjectKind::Promise(promise) => Some(*promise),
            _ => None,
        }
    }

    /// Run `f` inside a handle scope. Values created inside are unrooted
    /// when it returns unless reachable from elsewhere.
    pub fn with_scope<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.state.borrow_mut().roots.open_scope();
        let result = f(self);
        self.state.borrow_mut().roots.close_scope();
        self.safe_point();
        result
    }

    /// Keep `value` alive for the lifetime of the runtime
    pub fn root_global(&self, value: HostValue) {
        if let Some(r) = value.heap_ref() {
            self.state.borrow_mut().roots.add_global(r);
        }
    }

    /// Whether a heap value is still alive. Primitives always are.
    pub fn is_alive(&self, value: HostValue) -> bool {
        match value.heap_ref() {
            Some(r) => self.state.borrow().heap.contains(r),
            None => true,
        }
    }

    /// Number of live heap cells
    pub fn live_objects(&self) -> usize {
        self.state.borrow().heap.len()
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.state.borrow().stats.clone()
    }

    /// Run a full collection, then the finalizers of collected wrapped
    /// objects. Nested requests (from inside a finalizer) are ignored.
    pub fn collect_garbage(&self) -> GcStats {
        if self.collecting.replace(true) {
            return self.gc_stats();
        }

        let sweep = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let roots: Vec<HeapRef> = state
                .roots
                .iter()
                .chain(
                    state
                        .references
                        .values()
                        .filter(|entry| entry.count > 0)
                        .filter_map(|entry| entry.value.and_then(|v| v.heap_ref())),
                )
                .chain(state.deferreds.values().copied())
                .collect();
            let sweep = gc::collect(&mut state.heap, roots, &mut state.stats);

            for entry in state.references.values_mut() {
                if let Some(HostValue::Ref(r)) = entry.value {
                    if !state.heap.contains(r) {
                        entry.value = None;
                    }
                }
            }
            sweep
        };

        tracing::debug!(
            marked = sweep.marked,
            freed = sweep.freed,
            finalizers = sweep.finalizers.len(),
            "garbage collection"
        );
        for finalizer in sweep.finalizers {
            self.state.borrow_mut().roots.open_scope();
            finalizer(self as &dyn HostEnv);
            self.state.borrow_mut().roots.close_scope();
        }
        self.collecting.set(false);
        self.gc_stats()
    }

    /// Run queued microtasks until the queue is empty. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.microtasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    self.state.borrow_mut().roots.open_scope();
                    task(self as &dyn HostEnv);
                    self.state.borrow_mut().roots.close_scope();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Dispatch calls queued by other threads and run microtasks until no
    /// work is outstanding.
    ///
    /// Fails with [`EngineError::IdleTimeout`] if outstanding work makes no
    /// progress within the configured idle timeout.
    pub fn run_until_idle(&self) -> EngineResult<()> {
        let mut last_progress = Instant::now();
        loop {
            let mut progressed = self.receiver.try_dispatch(self) > 0;
            progressed |= self.run_microtasks() > 0;
            self.safe_point();

            let outstanding = self.receiver.outstanding();
            if outstanding == 0 && self.microtasks.borrow().is_empty() {
                return Ok(());
            }
            if progressed {
                last_progress = Instant::now();
                continue;
            }

            let elapsed = last_progress.elapsed();
            if elapsed >= self.config.idle_timeout {
                tracing::warn!(outstanding, "host loop made no progress");
                return Err(EngineError::IdleTimeout(self.config.idle_timeout, outstanding));
            }
            if self.receiver.dispatch_timeout(self, self.config.idle_timeout - elapsed) {
                last_progress = Instant::now();
            }
        }
    }

    /// Register a native module and root its exports object globally
    pub fn load_module(&self, module: &NativeModule, bridge: &Bridge) -> EngineResult<HostValue> {
        let exports = module.register(self, bridge)?;
        self.root_global(exports);
        self.set_property(self.global(), module.name(), exports)?;
        tracing::debug!(module = %module.name(), "module loaded");
        Ok(exports)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("live_objects", &self.live_objects())
            .field("call_depth", &self.call_depth.get())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Teardown: drop every root so remaining wrapped objects are finalized.
        {
            let mut state = self.state.borrow_mut();
            state.roots.clear();
            state.references.clear();
            state.deferreds.clear();
        }
        self.microtasks.borrow_mut().clear();
        let stats = self.collect_garbage();
        tracing::debug!(freed = stats.last_freed_count, "runtime torn down");
    }
}

// ============================================================================
// HostEnv
// ============================================================================

impl HostEnv for Runtime {
    fn create_string(&self, bytes: &[u8]) -> HostResult<HostValue> {
        Ok(self.allocate(HeapData::String(bytes.to_vec())))
    }

    fn create_bigint(&self, value: i128) -> HostResult<HostValue> {
        Ok(self.bigint(value))
    }

    fn create_object(&self) -> HostResult<HostValue> {
        Ok(self.object())
    }

    fn create_object_with_prototype(&self, prototype: HostValue) -> HostResult<HostValue> {
        let prototype = match prototype {
            HostValue::Null | HostValue::Undefined => None,
            other => {
                let r = Self::heap_ref(other)?;
                self.state.borrow().heap.object(r)?;
                Some(r)
            }
        };
        Ok(self.allocate_object(ObjectKind::Plain, prototype))
    }

    fn create_array(&self, len: usize) -> HostResult<HostValue> {
        if len > self.max_array_length() {
            return Err(self.throw("RangeError", "Invalid array length"));
        }
        Ok(self.allocate_object(ObjectKind::Array(vec![HostValue::Undefined; len]), None))
    }

    fn create_error(&self, name: &str, message: &str) -> HostResult<HostValue> {
        let error = self.allocate_object(ObjectKind::Error, None);
        let name = self.string(name);
        let message = self.string(message);
        self.define_own(error, "name", Property::Data(name))?;
        self.define_own(error, "message", Property::Data(message))?;
        Ok(error)
    }

    fn create_function(&self, name: &str, callback: HostCallback) -> HostResult<HostValue> {
        Ok(self.allocate_object(
            ObjectKind::Function(FunctionData {
                name: name.to_string(),
                callback,
            }),
            None,
        ))
    }

    fn kind_of(&self, value: HostValue) -> ValueKind {
        match value {
            HostValue::Undefined => ValueKind::Undefined,
            HostValue::Null => ValueKind::Null,
            HostValue::Bool(_) => ValueKind::Boolean,
            HostValue::Number(_) => ValueKind::Number,
            HostValue::Ref(r) => self
                .state
                .borrow()
                .heap
                .get(r)
                .map(HeapData::kind)
                .unwrap_or(ValueKind::Undefined),
        }
    }

    fn read_string(&self, value: HostValue) -> HostResult<Vec<u8>> {
        let r = Self::heap_ref(value)?;
        match self.state.borrow().heap.get(r)? {
            HeapData::String(bytes) => Ok(bytes.clone()),
            other => Err(HostError::InvalidArg(format!("{} is not a string", other.kind()))),
        }
    }

    fn read_bigint(&self, value: HostValue) -> HostResult<i128> {
        let r = Self::heap_ref(value)?;
        match self.state.borrow().heap.get(r)? {
            HeapData::BigInt(n) => Ok(*n),
            other => Err(HostError::InvalidArg(format!("{} is not a bigint", other.kind()))),
        }
    }

    fn get_property(&self, object: HostValue, key: &str) -> HostResult<HostValue> {
        match self.lookup(object, key)? {
            Lookup::Value(value) => {
                self.root(value);
                Ok(value)
            }
            Lookup::Accessor { getter: Some(getter), .. } => self.call_function(getter, object, &[]),
            Lookup::Accessor { getter: None, .. } | Lookup::Missing => Ok(HostValue::Undefined),
        }
    }

    fn set_property(&self, object: HostValue, key: &str, value: HostValue) -> HostResult<()> {
        let r = Self::heap_ref(object)?;
        if self.kind_of(object) == ValueKind::Array {
            if key == "length" {
                return self.set_array_length(r, value);
            }
            if let Some(index) = array_index(key) {
                return self.array_set(object, index, value);
            }
        }
        {
            let mut state = self.state.borrow_mut();
            let data = state.heap.object_mut(r)?;
            if let Some(Property::Data(slot)) = data.find_mut(key) {
                *slot = value;
                return Ok(());
            }
        }

        match self.lookup(object, key)? {
            Lookup::Accessor { setter: Some(setter), .. } => {
                self.call_function(setter, object, &[value])?;
                Ok(())
            }
            Lookup::Accessor { setter: None, .. } => Err(self.throw(
                "TypeError",
                &format!("Cannot set property {} which has only a getter", key),
            )),
            Lookup::Value(_) | Lookup::Missing => self.define_own(object, key, Property::Data(value)),
        }
    }

    fn has_property(&self, object: HostValue, key: &str) -> HostResult<bool> {
        Ok(!matches!(self.lookup(object, key)?, Lookup::Missing))
    }

    fn has_own_property(&self, object: HostValue, key: &str) -> HostResult<bool> {
        let r = Self::heap_ref(object)?;
        let state = self.state.borrow();
        let data = state.heap.object(r)?;
        if let Some(elements) = data.elements() {
            if key == "length" || array_index(key).map(|i| i < elements.len()).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(data.find(key).is_some())
    }

    fn delete_property(&self, object: HostValue, key: &str) -> HostResult<bool> {
        let r = Self::heap_ref(object)?;
        let mut state = self.state.borrow_mut();
        let data = state.heap.object_mut(r)?;
        if let ObjectKind::Array(elements) = &mut data.kind {
            if let Some(index) = array_index(key) {
                if let Some(slot) = elements.get_mut(index) {
                    *slot = HostValue::Undefined;
                }
                return Ok(true);
            }
        }
        data.remove(key);
        Ok(true)
    }

    fn property_names(&self, object: HostValue) -> HostResult<Vec<String>> {
        let r = Self::heap_ref(object)?;
        let state = self.state.borrow();
        let data = state.heap.object(r)?;
        let indices = data.elements().map(|e| e.len()).unwrap_or(0);
        Ok((0..indices)
            .map(|i| i.to_string())
            .chain(data.properties.iter().map(|(k, _)| k.clone()))
            .collect())
    }

    fn array_len(&self, array: HostValue) -> HostResult<usize> {
        let r = Self::heap_ref(array)?;
        let state = self.state.borrow();
        state
            .heap
            .object(r)?
            .elements()
            .map(Vec::len)
            .ok_or_else(|| HostError::InvalidArg("value is not an array".to_string()))
    }

    fn array_get(&self, array: HostValue, index: usize) -> HostResult<HostValue> {
        let r = Self::heap_ref(array)?;
        let value = {
            let state = self.state.borrow();
            let elements = state
                .heap
                .object(r)?
                .elements()
                .ok_or_else(|| HostError::InvalidArg("value is not an array".to_string()))?;
            elements.get(index).copied().unwrap_or(HostValue::Undefined)
        };
        self.root(value);
        Ok(value)
    }

    fn array_set(&self, array: HostValue, index: usize, value: HostValue) -> HostResult<()> {
        let r = Self::heap_ref(array)?;
        let limit = self.max_array_length();
        {
            let mut state = self.state.borrow_mut();
            let ObjectKind::Array(elements) = &mut state.heap.object_mut(r)?.kind else {
                return Err(HostError::InvalidArg("value is not an array".to_string()));
            };
            if index < elements.len() {
                elements[index] = value;
                return Ok(());
            }
            if index < limit {
                elements.resize(index + 1, HostValue::Undefined);
                elements[index] = value;
                return Ok(());
            }
        }
        Err(self.throw("RangeError", "Invalid array length"))
    }

    fn call_function(&self, function: HostValue, this: HostValue, args: &[HostValue]) -> HostResult<HostValue> {
        let (callback, name) = self.function_data(function)?;
        self.invoke(&name, callback, CallFrame::new(this, args.to_vec()))
    }

    fn define_class(&self, definition: ClassDefinition) -> HostResult<HostValue> {
        let ClassDefinition {
            name,
            constructor,
            methods,
            static_methods,
            accessors,
        } = definition;

        let prototype = self.object();
        let class = self.allocate_object(
            ObjectKind::Function(FunctionData {
                name: name.clone(),
                callback: constructor,
            }),
            None,
        );
        let class_name = self.string(&name);
        self.define_own(class, "name", Property::Data(class_name))?;
        self.define_own(class, "prototype", Property::Data(prototype))?;
        self.define_own(prototype, "constructor", Property::Data(class))?;

        for (method, callback) in &methods {
            let function = self.create_function(method, callback.clone())?;
            self.define_own(prototype, method, Property::Data(function))?;
        }
        for (method, callback) in &static_methods {
            let function = self.create_function(method, callback.clone())?;
            self.define_own(class, method, Property::Data(function))?;
        }
        for accessor in &accessors {
            let getter = match &accessor.getter {
                Some(cb) => Some(self.create_function(&format!("get {}", accessor.name), cb.clone())?),
                None => None,
            };
            let setter = match &accessor.setter {
                Some(cb) => Some(self.create_function(&format!("set {}", accessor.name), cb.clone())?),
                None => None,
            };
            self.define_own(prototype, &accessor.name, Property::Accessor { getter, setter })?;
        }

        tracing::debug!(
            class = %name,
            methods = methods.len(),
            statics = static_methods.len(),
            accessors = accessors.len(),
            "defined class"
        );
        Ok(class)
    }

    fn wrap(&self, object: HostValue, tag: u64, finalizer: Finalizer) -> HostResult<()> {
        let r = Self::heap_ref(object)?;
        let mut state = self.state.borrow_mut();
        let data = state.heap.object_mut(r)?;
        if data.wrap.is_some() {
            return Err(HostError::InvalidArg("object is already wrapped".to_string()));
        }
        data.wrap = Some(Wrap {
            tag,
            finalizer: Some(finalizer),
        });
        Ok(())
    }

    fn unwrap(&self, object: HostValue) -> HostResult<Option<u64>> {
        let r = match object.heap_ref() {
            Some(r) => r,
            None => return Ok(None),
        };
        let state = self.state.borrow();
        Ok(state.heap.object(r)?.wrap.as_ref().map(|w| w.tag))
    }

    fn remove_wrap(&self, object: HostValue) -> HostResult<Option<u64>> {
        let r = Self::heap_ref(object)?;
        let removed = self.state.borrow_mut().heap.object_mut(r)?.wrap.take();
        // The finalizer is dropped here without running.
        Ok(removed.map(|w| w.tag))
    }

    fn create_reference(&self, value: HostValue, count: u32) -> HostResult<ReferenceId> {
        let mut state = self.state.borrow_mut();
        if let Some(r) = value.heap_ref() {
            state.heap.get(r)?;
        }
        let id = state.next_reference;
        state.next_reference += 1;
        state.references.insert(
            id,
            RefEntry {
                value: Some(value),
                count,
            },
        );
        Ok(ReferenceId::from_raw(id))
    }

    fn reference_value(&self, reference: ReferenceId) -> HostResult<Option<HostValue>> {
        let value = {
            let state = self.state.borrow();
            state
                .references
                .get(&reference.as_raw())
                .ok_or_else(|| HostError::InvalidArg(format!("unknown reference {}", reference.as_raw())))?
                .value
        };
        if let Some(value) = value {
            self.root(value);
        }
        Ok(value)
    }

    fn reference_ref(&self, reference: ReferenceId) -> HostResult<u32> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .references
            .get_mut(&reference.as_raw())
            .ok_or_else(|| HostError::InvalidArg(format!("unknown reference {}", reference.as_raw())))?;
        entry.count += 1;
        Ok(entry.count)
    }

    fn reference_unref(&self, reference: ReferenceId) -> HostResult<u32> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .references
            .get_mut(&reference.as_raw())
            .ok_or_else(|| HostError::InvalidArg(format!("unknown reference {}", reference.as_raw())))?;
        if entry.count == 0 {
            return Err(HostError::InvalidArg("reference count is already zero".to_string()));
        }
        entry.count -= 1;
        Ok(entry.count)
    }

    fn delete_reference(&self, reference: ReferenceId) -> HostResult<()> {
        self.state
            .borrow_mut()
            .references
            .remove(&reference.as_raw())
            .map(|_| ())
            .ok_or_else(|| HostError::InvalidArg(format!("unknown reference {}", reference.as_raw())))
    }

    fn create_promise(&self) -> HostResult<(Deferred, HostValue)> {
        let promise = self.allocate_object(ObjectKind::Promise(PromiseState::Pending), None);
        let r = Self::heap_ref(promise)?;
        let mut state = self.state.borrow_mut();
        let id = state.next_deferred;
        state.next_deferred += 1;
        state.deferreds.insert(id, r);
        Ok((Deferred::from_raw(id), promise))
    }

    fn resolve_deferred(&self, deferred: Deferred, value: HostValue) -> HostResult<()> {
        settle(self, deferred, PromiseState::Fulfilled(value))
    }

    fn reject_deferred(&self, deferred: Deferred, reason: HostValue) -> HostResult<()> {
        settle(self, deferred, PromiseState::Rejected(reason))
    }

    fn open_scope(&self) {
        self.state.borrow_mut().roots.open_scope();
    }

    fn close_scope(&self) {
        self.state.borrow_mut().roots.close_scope();
    }

    fn enqueue_microtask(&self, task: Microtask) {
        self.microtasks.borrow_mut().push_back(task);
    }

    fn call_queue(&self) -> CallQueue {
        self.queue.clone()
    }

    fn adjust_external_memory(&self, delta: i64) -> i64 {
        let total = self.external_memory.get().saturating_add(delta);
        self.external_memory.set(total);
        total
    }
}

fn settle(runtime: &Runtime, deferred: Deferred, outcome: PromiseState) -> HostResult<()> {
    let mut state = runtime.state.borrow_mut();
    let r = state
        .deferreds
        .remove(&deferred.as_raw())
        .ok_or_else(|| HostError::InvalidArg(format!("unknown or settled deferred {}", deferred.as_raw())))?;
    match &mut state.heap.object_mut(r)?.kind {
        ObjectKind::Promise(promise) => {
            *promise = outcome;
            Ok(())
        }
        _ => Err(HostError::InvalidArg("deferred does not belong to a promise".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thrown_message(rt: &Runtime, error: HostError) -> String {
        match error {
            HostError::Exception(value) => {
                let message = rt.get(value, "message").unwrap();
                rt.to_rust_string(message).unwrap()
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn test_properties_and_prototypes() {
        let rt = Runtime::new();
        let proto = rt.object();
        rt.set(proto, "inherited", HostValue::Number(1.0)).unwrap();
        let obj = rt.create_object_with_prototype(proto).unwrap();
        rt.set(obj, "own", HostValue::Bool(true)).unwrap();

        assert_eq!(rt.get(obj, "inherited").unwrap(), HostValue::Number(1.0));
        assert_eq!(rt.get(obj, "missing").unwrap(), HostValue::Undefined);
        assert!(rt.has_property(obj, "inherited").unwrap());
        assert!(!rt.has_own_property(obj, "inherited").unwrap());
        assert_eq!(rt.property_names(obj).unwrap(), vec!["own".to_string()]);
        assert!(rt.delete_property(obj, "own").unwrap());
        assert!(rt.delete_property(obj, "own").unwrap());
        assert!(!rt.has_own_property(obj, "own").unwrap());
    }

    #[test]
    fn test_array_holes() {
        let rt = Runtime::new();
        let arr = rt.array(&[HostValue::Number(1.0)]);
        rt.array_set(arr, 3, HostValue::Bool(true)).unwrap();
        assert_eq!(rt.array_len(arr).unwrap(), 4);
        assert_eq!(rt.array_get(arr, 2).unwrap(), HostValue::Undefined);
        assert_eq!(rt.get(arr, "length").unwrap(), HostValue::Number(4.0));
        assert_eq!(rt.get(arr, "3").unwrap(), HostValue::Bool(true));
        rt.set(arr, "length", HostValue::Number(1.0)).unwrap();
        assert_eq!(rt.array_len(arr).unwrap(), 1);
    }

    #[test]
    fn test_call_roots_and_throws() {
        let rt = Runtime::new();
        let f = rt.function("thrower", |env, frame| {
            assert_eq!(frame.args.len(), 1);
            let error = env.create_error("Error", "Kablooie").map_err(|_| HostValue::Undefined)?;
            Err(error)
        });
        let err = rt.call(f, HostValue::Undefined, &[HostValue::Null]).unwrap_err();
        assert_eq!(thrown_message(&rt, err), "Kablooie");
    }

    #[test]
    fn test_call_depth_limit() {
        let rt = Runtime::with_config(RuntimeConfig::default().with_max_call_depth(4));
        let recurse = rt.function("recurse", |env, frame| {
            env.call_function(frame.this, frame.this, &[]).map_err(|e| match e {
                HostError::Exception(v) => v,
                _ => HostValue::Undefined,
            })
        });
        let err = rt.call(recurse, recurse, &[]).unwrap_err();
        assert_eq!(thrown_message(&rt, err), "Maximum call stack size exceeded");
    }

    #[test]
    fn test_accessors_and_setter_only_errors() {
        let rt = Runtime::new();
        let getter: HostCallback =
            Rc::new(|_: &dyn HostEnv, _: &CallFrame| -> Result<HostValue, HostValue> { Ok(HostValue::Number(42.0)) });
        let class = rt
            .define_class(ClassDefinition {
                name: "Thing".to_string(),
                constructor: Rc::new(|_: &dyn HostEnv, frame: &CallFrame| -> Result<HostValue, HostValue> {
                    Ok(frame.this)
                }),
                methods: Vec::new(),
                static_methods: Vec::new(),
                accessors: vec![tether_sdk::AccessorDefinition {
                    name: "answer".to_string(),
                    getter: Some(getter),
                    setter: None,
                }],
            })
            .unwrap();
        let instance = rt.construct(class, &[]).unwrap();
        assert_eq!(rt.get(instance, "answer").unwrap(), HostValue::Number(42.0));
        assert!(rt.property_names(instance).unwrap().is_empty());
        let err = rt.set(instance, "answer", HostValue::Null).unwrap_err();
        assert!(thrown_message(&rt, err).contains("only a getter"));
    }

    #[test]
    fn test_weak_reference_cleared_and_finalizer_runs() {
        let rt = Runtime::new();
        let finalized = Rc::new(Cell::new(0));
        let reference = rt.with_scope(|rt| {
            let obj = rt.object();
            let counter = finalized.clone();
            rt.wrap(obj, 1, Box::new(move |_: &dyn HostEnv| counter.set(counter.get() + 1)))
                .unwrap();
            rt.create_reference(obj, 0).unwrap()
        });
        rt.collect_garbage();
        assert_eq!(finalized.get(), 1);
        assert_eq!(rt.reference_value(reference).unwrap(), None);
        rt.collect_garbage();
        assert_eq!(finalized.get(), 1);
    }

    #[test]
    fn test_strong_reference_keeps_alive() {
        let rt = Runtime::new();
        let (reference, obj) = rt.with_scope(|rt| {
            let obj = rt.object();
            (rt.create_reference(obj, 1).unwrap(), obj)
        });
        rt.collect_garbage();
        assert!(rt.is_alive(obj));
        assert_eq!(rt.reference_unref(reference).unwrap(), 0);
        assert!(rt.reference_unref(reference).is_err());
        rt.collect_garbage();
        assert!(!rt.is_alive(obj));
        rt.delete_reference(reference).unwrap();
        assert!(rt.delete_reference(reference).is_err());
    }

    #[test]
    fn test_remove_wrap_cancels_finalizer() {
        let rt = Runtime::new();
        let finalized = Rc::new(Cell::new(false));
        rt.with_scope(|rt| {
            let obj = rt.object();
            let flag = finalized.clone();
            rt.wrap(obj, 9, Box::new(move |_: &dyn HostEnv| flag.set(true))).unwrap();
            assert!(rt.wrap(obj, 10, Box::new(|_: &dyn HostEnv| {})).is_err());
            assert_eq!(rt.unwrap(obj).unwrap(), Some(9));
            assert_eq!(rt.remove_wrap(obj).unwrap(), Some(9));
            assert_eq!(rt.unwrap(obj).unwrap(), None);
        });
        rt.collect_garbage();
        assert!(!finalized.get());
    }

    #[test]
    fn test_promises_settle_once() {
        let rt = Runtime::new();
        let (deferred, promise) = rt.create_promise().unwrap();
        assert_eq!(rt.promise_state(promise), Some(PromiseState::Pending));
        rt.resolve_deferred(deferred, HostValue::Number(456.0)).unwrap();
        assert_eq!(rt.promise_state(promise), Some(PromiseState::Fulfilled(HostValue::Number(456.0))));
        assert!(rt.reject_deferred(deferred, HostValue::Null).is_err());
        assert_eq!(rt.promise_state(HostValue::Null), None);
    }

    #[test]
    fn test_microtasks_run_in_order() {
        let rt = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            rt.enqueue_microtask(Box::new(move |_: &dyn HostEnv| log.borrow_mut().push(i)));
        }
        assert_eq!(rt.run_microtasks(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        rt.run_until_idle().unwrap();
    }

    #[test]
    fn test_queued_calls_from_other_threads() {
        let rt = Runtime::new();
        let queue = rt.call_queue();
        let global = rt.global();
        std::thread::spawn(move || {
            queue
                .send(move |env| {
                    env.set_property(global, "fromWorker", HostValue::Bool(true)).unwrap();
                })
                .unwrap();
        })
        .join()
        .unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.get(rt.global(), "fromWorker").unwrap(), HostValue::Bool(true));
    }

    #[test]
    fn test_idle_timeout_with_held_loop() {
        let rt = Runtime::with_config(
            RuntimeConfig::default().with_idle_timeout(std::time::Duration::from_millis(20)),
        );
        let hold = rt.call_queue().hold();
        assert!(matches!(rt.run_until_idle(), Err(EngineError::IdleTimeout(_, 1))));
        drop(hold);
        rt.run_until_idle().unwrap();
    }

    #[test]
    fn test_external_memory() {
        let rt = Runtime::new();
        assert_eq!(rt.adjust_external_memory(100), 100);
        assert_eq!(rt.adjust_external_memory(-40), 60);
    }

    #[test]
    fn test_automatic_collection_at_safe_points() {
        let rt = Runtime::with_config(RuntimeConfig::default().with_gc_threshold(1));
        rt.with_scope(|rt| {
            for _ in 0..100 {
                rt.object();
            }
        });
        assert!(rt.gc_stats().collections >= 1);
        assert!(rt.live_objects() < 100);
    }
}
