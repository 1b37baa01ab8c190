//! HostEnv trait — abstract host runtime operations
//!
//! Defines the interface a host runtime implements. The bridge (and every
//! native module built on it) programs against this trait without depending
//! on host internals.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::HostResult;
use crate::queue::CallQueue;
use crate::value::{HostValue, ValueKind};

/// Native callback invoked by the host.
///
/// `Err` carries the host value to throw.
pub type HostCallback = Rc<dyn Fn(&dyn HostEnv, &CallFrame) -> Result<HostValue, HostValue>>;

/// Callback run by the host when a wrapped object is collected
pub type Finalizer = Box<dyn FnOnce(&dyn HostEnv)>;

/// Work scheduled on the host's microtask queue
pub type Microtask = Box<dyn FnOnce(&dyn HostEnv)>;

/// Receiver, arguments and construction target of one host call
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// `this` value
    pub this: HostValue,
    /// Arguments in host order
    pub args: Vec<HostValue>,
    /// Constructor being invoked with `new`, `Undefined` for plain calls
    pub new_target: HostValue,
}

impl CallFrame {
    /// Frame for a plain call
    pub fn new(this: HostValue, args: Vec<HostValue>) -> Self {
        CallFrame {
            this,
            args,
            new_target: HostValue::Undefined,
        }
    }

    /// Argument at `index`, `Undefined` when not supplied
    pub fn arg(&self, index: usize) -> HostValue {
        self.args.get(index).copied().unwrap_or(HostValue::Undefined)
    }

    /// Whether the call is a construction (`new`)
    pub fn is_construct(&self) -> bool {
        !self.new_target.is_undefined()
    }
}

/// Host reference that keeps a value alive (count > 0) or observes it weakly
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceId(u64);

impl ReferenceId {
    /// Create from the host's raw identifier
    pub const fn from_raw(raw: u64) -> Self {
        ReferenceId(raw)
    }

    /// Get the host's raw identifier
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Strong reference that may be held and dropped on any thread.
///
/// The value stays alive while any clone exists. Dropping the last clone
/// deletes the reference through the host's call queue.
#[derive(Clone)]
pub struct Persistent {
    inner: Arc<PersistentInner>,
}

struct PersistentInner {
    reference: ReferenceId,
    value: HostValue,
    queue: CallQueue,
}

impl Persistent {
    /// Keep `value` alive past the current handle scope; host thread only
    pub fn new(env: &dyn HostEnv, value: HostValue) -> HostResult<Self> {
        let reference = env.create_reference(value, 1)?;
        Ok(Persistent {
            inner: Arc::new(PersistentInner {
                reference,
                value,
                queue: env.call_queue(),
            }),
        })
    }

    /// The referenced value
    pub fn value(&self) -> HostValue {
        self.inner.value
    }

    /// The underlying host reference
    pub fn reference(&self) -> ReferenceId {
        self.inner.reference
    }
}

impl Drop for PersistentInner {
    fn drop(&mut self) {
        let reference = self.reference;
        let released = self.queue.send(move |env: &dyn HostEnv| {
            let _ = env.delete_reference(reference);
        });
        if released.is_err() {
            tracing::debug!(reference = reference.as_raw(), "host loop gone, reference not released");
        }
    }
}

impl fmt::Debug for Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistent")
            .field("reference", &self.inner.reference)
            .field("value", &self.inner.value)
            .finish()
    }
}

/// Pending promise resolver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Deferred(u64);

impl Deferred {
    /// Create from the host's raw identifier
    pub const fn from_raw(raw: u64) -> Self {
        Deferred(raw)
    }

    /// Get the host's raw identifier
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Getter/setter pair installed on a class prototype
#[derive(Clone)]
pub struct AccessorDefinition {
    /// Property name
    pub name: String,
    /// Getter callback
    pub getter: Option<HostCallback>,
    /// Setter callback
    pub setter: Option<HostCallback>,
}

/// Everything the host needs to create a class
#[derive(Clone)]
pub struct ClassDefinition {
    /// Class name
    pub name: String,
    /// Called with the freshly created instance as `this`
    pub constructor: HostCallback,
    /// Prototype methods in declaration order
    pub methods: Vec<(String, HostCallback)>,
    /// Methods on the constructor itself
    pub static_methods: Vec<(String, HostCallback)>,
    /// Prototype accessors
    pub accessors: Vec<AccessorDefinition>,
}

impl fmt::Debug for ClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("name", &self.name)
            .field("methods", &self.methods.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field(
                "static_methods",
                &self.static_methods.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field(
                "accessors",
                &self.accessors.iter().map(|a| &a.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Abstract host runtime for the bridge.
///
/// This trait is the single entry point for all host operations. A host
/// runtime provides the concrete implementation; the bridge only ever sees
/// `&dyn HostEnv`, and only on the host thread.
///
/// Any method that runs host code (property getters, calls) may re-enter
/// native callbacks. Implementations must not hold internal borrows across
/// such calls.
pub trait HostEnv {
    // ========================================================================
    // Value Creation
    // ========================================================================

    /// Allocate a string from UTF-8 bytes
    fn create_string(&self, bytes: &[u8]) -> HostResult<HostValue>;

    /// Allocate a big-integer
    fn create_bigint(&self, value: i128) -> HostResult<HostValue>;

    /// Allocate an empty plain object
    fn create_object(&self) -> HostResult<HostValue>;

    /// Allocate an empty object with the given prototype
    fn create_object_with_prototype(&self, prototype: HostValue) -> HostResult<HostValue>;

    /// Allocate an array of `len` undefined elements
    fn create_array(&self, len: usize) -> HostResult<HostValue>;

    /// Allocate an error object carrying `name` and `message`
    fn create_error(&self, name: &str, message: &str) -> HostResult<HostValue>;

    /// Allocate a function backed by a native callback
    fn create_function(&self, name: &str, callback: HostCallback) -> HostResult<HostValue>;

    // ========================================================================
    // Value Inspection
    // ========================================================================

    /// Runtime kind of a value
    fn kind_of(&self, value: HostValue) -> ValueKind;

    /// Raw bytes of a string value (not guaranteed to be valid UTF-8)
    fn read_string(&self, value: HostValue) -> HostResult<Vec<u8>>;

    /// Value of a big-integer
    fn read_bigint(&self, value: HostValue) -> HostResult<i128>;

    // ========================================================================
    // Properties
    // ========================================================================

    /// Read a property, walking the prototype chain; `Undefined` when absent
    fn get_property(&self, object: HostValue, key: &str) -> HostResult<HostValue>;

    /// Write a property (invokes setters found on the prototype chain)
    fn set_property(&self, object: HostValue, key: &str, value: HostValue) -> HostResult<()>;

    /// Whether the property exists on the object or its prototype chain
    fn has_property(&self, object: HostValue, key: &str) -> HostResult<bool>;

    /// Whether the property exists on the object itself
    fn has_own_property(&self, object: HostValue, key: &str) -> HostResult<bool>;

    /// Remove an own property; deleting a missing key succeeds
    fn delete_property(&self, object: HostValue, key: &str) -> HostResult<bool>;

    /// Own enumerable property names in insertion order
    fn property_names(&self, object: HostValue) -> HostResult<Vec<String>>;

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Array length
    fn array_len(&self, array: HostValue) -> HostResult<usize>;

    /// Element at `index`; `Undefined` past the end
    fn array_get(&self, array: HostValue, index: usize) -> HostResult<HostValue>;

    /// Write element at `index`, extending with undefined holes
    fn array_set(&self, array: HostValue, index: usize, value: HostValue) -> HostResult<()>;

    // ========================================================================
    // Functions and Classes
    // ========================================================================

    /// Call a host function synchronously
    fn call_function(
        &self,
        function: HostValue,
        this: HostValue,
        args: &[HostValue],
    ) -> HostResult<HostValue>;

    /// Create a class and return its constructor
    fn define_class(&self, definition: ClassDefinition) -> HostResult<HostValue>;

    // ========================================================================
    // Wrapping
    // ========================================================================

    /// Associate a native tag with an object and register its finalizer.
    ///
    /// Fails if the object is already wrapped.
    fn wrap(&self, object: HostValue, tag: u64, finalizer: Finalizer) -> HostResult<()>;

    /// Native tag associated with an object
    fn unwrap(&self, object: HostValue) -> HostResult<Option<u64>>;

    /// Remove the association without running the finalizer
    fn remove_wrap(&self, object: HostValue) -> HostResult<Option<u64>>;

    // ========================================================================
    // References
    // ========================================================================

    /// Create a reference; a count of zero makes it weak
    fn create_reference(&self, value: HostValue, count: u32) -> HostResult<ReferenceId>;

    /// Referenced value, `None` once a weakly-held value was collected
    fn reference_value(&self, reference: ReferenceId) -> HostResult<Option<HostValue>>;

    /// Increment the count, returning the new count
    fn reference_ref(&self, reference: ReferenceId) -> HostResult<u32>;

    /// Decrement the count, returning the new count
    fn reference_unref(&self, reference: ReferenceId) -> HostResult<u32>;

    /// Delete a reference
    fn delete_reference(&self, reference: ReferenceId) -> HostResult<()>;

    // ========================================================================
    // Handle Scopes
    // ========================================================================

    /// Open a handle scope. Values created until the matching
    /// [`close_scope`](Self::close_scope) are kept alive only that long.
    fn open_scope(&self);

    /// Close the innermost handle scope
    fn close_scope(&self);

    // ========================================================================
    // Promises and Scheduling
    // ========================================================================

    /// Create a pending promise and its resolver
    fn create_promise(&self) -> HostResult<(Deferred, HostValue)>;

    /// Fulfil a pending promise
    fn resolve_deferred(&self, deferred: Deferred, value: HostValue) -> HostResult<()>;

    /// Reject a pending promise
    fn reject_deferred(&self, deferred: Deferred, reason: HostValue) -> HostResult<()>;

    /// Schedule work after the current host job completes
    fn enqueue_microtask(&self, task: Microtask);

    /// Sender side of the host's thread-safe call queue
    fn call_queue(&self) -> CallQueue;

    /// Report native memory held alive by host objects; returns the new total
    fn adjust_external_memory(&self, delta: i64) -> i64;
}
