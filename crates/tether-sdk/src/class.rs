//! ClassExporter — native structs as host classes
//!
//! A [`ClassBuilder`] collects one constructor, instance methods, async
//! instance methods, static methods and field accessors for a native type
//! `T`, then [`build`](ClassBuilder::build)s a type-erased [`ExportedClass`].
//! Defining the class in a host creates:
//!
//! - a constructor that binds its arguments, runs the native constructor,
//!   registers the value and attaches it to the host-created instance;
//! - prototype methods that resolve and pin `this` before dispatching;
//! - prototype accessors reading and writing native fields;
//! - static methods on the constructor.
//!
//! With `#[derive(Reflect)]` and `#[methods]`,
//! [`ClassBuilder::by_convention`] discovers all of the above.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::binder::{ArgumentBinder, FunctionDescriptor};
use crate::bridge::Bridge;
use crate::context::{AccessorDefinition, CallFrame, ClassDefinition, HostCallback, HostEnv};
use crate::convert::Reflect;
use crate::error::{BridgeError, BridgeResult, PathSegment};
use crate::function::{self, CallContext, NativeFunction, SyncBody};
use crate::handle::Handle;
use crate::value::{HostValue, NativeValue, ResourceType, TypeTag};

/// Native constructor body
pub type ConstructorFn<T> =
    Arc<dyn Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<T> + Send + Sync>;

/// `&self` method body
pub type RefMethodFn<T> =
    Arc<dyn Fn(&mut CallContext<'_>, &T, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync>;

/// `&mut self` method body
pub type MutMethodFn<T> =
    Arc<dyn Fn(&mut CallContext<'_>, &mut T, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync>;

/// Work produced on the host thread and finished on a worker
pub type AsyncTask = Box<dyn FnOnce() -> BridgeResult<NativeValue> + Send>;

/// Async method preparation, run on the host thread while `this` is pinned
pub type PrepareFn<T> = Arc<dyn Fn(&T, Vec<NativeValue>) -> BridgeResult<AsyncTask> + Send + Sync>;

/// Field getter
pub type GetterFn<T> = Arc<dyn Fn(&T) -> NativeValue + Send + Sync>;

/// Field setter
pub type SetterFn<T> = Arc<dyn Fn(&mut T, NativeValue) -> BridgeResult<()> + Send + Sync>;

// ============================================================================
// Method entries
// ============================================================================

/// Kind of a class member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Builds the native value
    Constructor,
    /// Prototype method
    Instance,
    /// Method on the constructor
    Static,
}

/// Body of a class member
pub enum MethodBody<T> {
    /// Constructor
    Constructor(ConstructorFn<T>),
    /// Shared-access method
    Ref(RefMethodFn<T>),
    /// Exclusive-access method
    Mut(MutMethodFn<T>),
    /// Async method
    Async(PrepareFn<T>),
    /// Static method
    Static(SyncBody),
}

impl<T> Clone for MethodBody<T> {
    fn clone(&self) -> Self {
        match self {
            MethodBody::Constructor(f) => MethodBody::Constructor(f.clone()),
            MethodBody::Ref(f) => MethodBody::Ref(f.clone()),
            MethodBody::Mut(f) => MethodBody::Mut(f.clone()),
            MethodBody::Async(f) => MethodBody::Async(f.clone()),
            MethodBody::Static(f) => MethodBody::Static(f.clone()),
        }
    }
}

/// One constructor or method of a class
pub struct MethodEntry<T> {
    descriptor: FunctionDescriptor,
    body: MethodBody<T>,
}

impl<T> Clone for MethodEntry<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            body: self.body.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> MethodEntry<T> {
    /// Constructor entry
    pub fn constructor(
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: MethodBody::Constructor(Arc::new(f)),
        }
    }

    /// `&self` method entry
    pub fn method(
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, &T, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: MethodBody::Ref(Arc::new(f)),
        }
    }

    /// `&mut self` method entry
    pub fn method_mut(
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, &mut T, Vec<NativeValue>) -> BridgeResult<NativeValue>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: MethodBody::Mut(Arc::new(f)),
        }
    }

    /// Async method entry; the descriptor is marked async
    pub fn async_method(
        descriptor: FunctionDescriptor,
        prepare: impl Fn(&T, Vec<NativeValue>) -> BridgeResult<AsyncTask> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor: descriptor.asynchronous(),
            body: MethodBody::Async(Arc::new(prepare)),
        }
    }

    /// Static method entry
    pub fn static_method(
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: MethodBody::Static(Arc::new(f)),
        }
    }

    /// Host-visible name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Declared signature
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Member kind
    pub fn kind(&self) -> MethodKind {
        match self.body {
            MethodBody::Constructor(_) => MethodKind::Constructor,
            MethodBody::Static(_) => MethodKind::Static,
            _ => MethodKind::Instance,
        }
    }
}

impl<T> fmt::Debug for MethodEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodEntry({})", self.descriptor)
    }
}

struct FieldEntry<T> {
    name: String,
    ty: TypeTag,
    get: GetterFn<T>,
    set: Option<SetterFn<T>>,
}

impl<T> Clone for FieldEntry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            ty: self.ty.clone(),
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects the members of a class backed by native type `T`
pub struct ClassBuilder<T> {
    name: String,
    constructor: Option<MethodEntry<T>>,
    methods: Vec<MethodEntry<T>>,
    statics: Vec<MethodEntry<T>>,
    fields: Vec<FieldEntry<T>>,
}

impl<T: Send + Sync + 'static> ClassBuilder<T> {
    /// Empty class named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: None,
            methods: Vec::new(),
            statics: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Add any entry; a constructor replaces the previous one
    pub fn entry(mut self, entry: MethodEntry<T>) -> Self {
        match entry.kind() {
            MethodKind::Constructor => self.constructor = Some(entry),
            MethodKind::Instance => self.methods.push(entry),
            MethodKind::Static => self.statics.push(entry),
        }
        self
    }

    /// Set the constructor
    pub fn constructor(
        self,
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<T> + Send + Sync + 'static,
    ) -> Self {
        self.entry(MethodEntry::constructor(descriptor, f))
    }

    /// Add a `&self` method
    pub fn method(
        self,
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, &T, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        self.entry(MethodEntry::method(descriptor, f))
    }

    /// Add a `&mut self` method
    pub fn method_mut(
        self,
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, &mut T, Vec<NativeValue>) -> BridgeResult<NativeValue>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.entry(MethodEntry::method_mut(descriptor, f))
    }

    /// Add an async method.
    ///
    /// `prepare` runs on the host thread with `this` pinned and returns the
    /// work to finish on a worker; the host receives a promise.
    pub fn async_method(
        self,
        descriptor: FunctionDescriptor,
        prepare: impl Fn(&T, Vec<NativeValue>) -> BridgeResult<AsyncTask> + Send + Sync + 'static,
    ) -> Self {
        self.entry(MethodEntry::async_method(descriptor, prepare))
    }

    /// Add a static method
    pub fn static_method(
        self,
        descriptor: FunctionDescriptor,
        f: impl Fn(&mut CallContext<'_>, Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        self.entry(MethodEntry::static_method(descriptor, f))
    }

    /// Add a read/write field accessor
    pub fn field(
        mut self,
        name: impl Into<String>,
        ty: TypeTag,
        get: impl Fn(&T) -> NativeValue + Send + Sync + 'static,
        set: impl Fn(&mut T, NativeValue) -> BridgeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.fields.push(FieldEntry {
            name: name.into(),
            ty,
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        });
        self
    }

    /// Add a read-only field accessor
    pub fn readonly_field(
        mut self,
        name: impl Into<String>,
        ty: TypeTag,
        get: impl Fn(&T) -> NativeValue + Send + Sync + 'static,
    ) -> Self {
        self.fields.push(FieldEntry {
            name: name.into(),
            ty,
            get: Arc::new(get),
            set: None,
        });
        self
    }

    /// Finish the class
    pub fn build(self) -> ExportedClass {
        let name = self.name.clone();
        let invalid = self.validate().err();
        let class = Arc::new(self);
        ExportedClass {
            name,
            resource: ResourceType::of::<T>(),
            invalid,
            definition: Arc::new(move |bridge: &Bridge| class.definition(bridge)),
        }
    }

    fn validate(&self) -> BridgeResult<()> {
        for entry in self.constructor.iter().chain(&self.methods).chain(&self.statics) {
            entry.descriptor.validate()?;
        }
        for field in &self.fields {
            field
                .ty
                .validate()
                .map_err(|e| e.within(PathSegment::Field(field.name.clone())))?;
        }
        Ok(())
    }

    fn definition(&self, bridge: &Bridge) -> ClassDefinition {
        ClassDefinition {
            name: self.name.clone(),
            constructor: self.constructor_callback(bridge),
            methods: self
                .methods
                .iter()
                .map(|m| (m.name().to_string(), method_callback(bridge, m)))
                .collect(),
            static_methods: self
                .statics
                .iter()
                .filter_map(|m| match &m.body {
                    MethodBody::Static(body) => Some((
                        m.name().to_string(),
                        NativeFunction::from_body(m.descriptor.clone(), body.clone()).callback(bridge),
                    )),
                    _ => None,
                })
                .collect(),
            accessors: self.fields.iter().map(|f| accessor(bridge, f)).collect(),
        }
    }

    fn constructor_callback(&self, bridge: &Bridge) -> HostCallback {
        let bridge = bridge.clone();
        let class_name = self.name.clone();
        let entry = self.constructor.clone();

        Rc::new(move |env: &dyn HostEnv, frame: &CallFrame| {
            let result = (|| -> BridgeResult<HostValue> {
                if !frame.is_construct() {
                    return Err(BridgeError::Native(format!(
                        "class constructor {} cannot be invoked without 'new'",
                        class_name
                    )));
                }
                let (descriptor, ctor) = match &entry {
                    Some(MethodEntry {
                        descriptor,
                        body: MethodBody::Constructor(ctor),
                    }) => (descriptor, ctor),
                    _ => {
                        return Err(BridgeError::Native(format!(
                            "class {} cannot be constructed from the host",
                            class_name
                        )))
                    }
                };

                let codec = bridge.codec(env);
                let args = ArgumentBinder::bind(&codec, descriptor, &frame.args, bridge.allocator())?;
                let _pins = function::pin_arguments(&bridge, &args)?;
                let mut ctx = CallContext::new(env, &bridge, frame.this);
                let value = function::catch_panic(|| ctor(&mut ctx, args))?;

                let handle = bridge.handles().register_boxed(value)?;
                if let Err(e) = bridge.handles().attach(env, handle, frame.this) {
                    bridge.handles().finalize(handle);
                    return Err(e);
                }
                tracing::trace!(class = %class_name, id = handle.id().as_raw(), "constructed instance");
                Ok(frame.this)
            })();
            result.map_err(|e| e.to_host(env))
        })
    }
}

impl<T: Reflect> ClassBuilder<T> {
    /// Class whose fields and methods are discovered from `T`'s reflection
    pub fn by_convention(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name);
        for field in T::shape().fields() {
            let getter_name = field.name.clone();
            let setter_name = field.name.clone();
            builder = builder.field(
                field.name.clone(),
                field.ty.clone(),
                move |this: &T| this.get_field(&getter_name).unwrap_or_default(),
                move |this: &mut T, value| this.set_field(&setter_name, value),
            );
        }
        for entry in T::methods() {
            builder = builder.entry(entry);
        }
        builder
    }
}

/// Resolve `this` to a live handle of the expected resource type
fn this_handle(env: &dyn HostEnv, bridge: &Bridge, this: HostValue, resource: ResourceType) -> BridgeResult<Handle> {
    bridge
        .codec(env)
        .decode(this, &TypeTag::Pointer(resource))
        .map_err(|e| e.within(PathSegment::Field("this".to_string())))?
        .as_handle()
        .ok_or_else(|| BridgeError::mismatch(resource.short_name(), "non-pointer"))
}

fn method_callback<T: Send + Sync + 'static>(bridge: &Bridge, entry: &MethodEntry<T>) -> HostCallback {
    let bridge = bridge.clone();
    let descriptor = entry.descriptor.clone();
    let body = entry.body.clone();
    let resource = ResourceType::of::<T>();

    Rc::new(move |env: &dyn HostEnv, frame: &CallFrame| {
        tracing::trace!(method = descriptor.name(), "native method call");
        let result = (|| -> BridgeResult<HostValue> {
            let handle = this_handle(env, &bridge, frame.this, resource)?;
            let codec = bridge.codec(env);
            let args = ArgumentBinder::bind(&codec, &descriptor, &frame.args, bridge.allocator())?;
            let pins = function::pin_arguments(&bridge, &args)?;
            let handles = bridge.handles();
            let mut ctx = CallContext::new(env, &bridge, frame.this);

            let value = match &body {
                MethodBody::Ref(f) => {
                    handles.with_ref(handle, |this: &T| function::catch_panic(|| f(&mut ctx, this, args)))??
                }
                MethodBody::Mut(f) => handles
                    .with_mut(handle, |this: &mut T| function::catch_panic(|| f(&mut ctx, this, args)))??,
                MethodBody::Async(prepare) => {
                    let task =
                        handles.with_ref(handle, |this: &T| function::catch_panic(|| prepare(this, args)))??;
                    return function::spawn_settled(env, &bridge, descriptor.return_type().clone(), move || {
                        let result = function::catch_panic(task);
                        drop(pins);
                        result
                    });
                }
                MethodBody::Constructor(_) | MethodBody::Static(_) => {
                    return Err(BridgeError::Native(format!(
                        "{} is not an instance method",
                        descriptor.name()
                    )))
                }
            };
            codec
                .encode(&value, descriptor.return_type())
                .map_err(|e| e.within(PathSegment::Return))
        })();
        result.map_err(|e| e.to_host(env))
    })
}

fn accessor<T: Send + Sync + 'static>(bridge: &Bridge, field: &FieldEntry<T>) -> AccessorDefinition {
    let resource = ResourceType::of::<T>();

    let getter: HostCallback = {
        let bridge = bridge.clone();
        let field = field.clone();
        Rc::new(move |env: &dyn HostEnv, frame: &CallFrame| {
            let result = (|| -> BridgeResult<HostValue> {
                let handle = this_handle(env, &bridge, frame.this, resource)?;
                let value = bridge.handles().with_ref(handle, |this: &T| (field.get)(this))?;
                bridge
                    .codec(env)
                    .encode(&value, &field.ty)
                    .map_err(|e| e.within(PathSegment::Field(field.name.clone())))
            })();
            result.map_err(|e| e.to_host(env))
        })
    };

    let setter: Option<HostCallback> = field.set.clone().map(|set| {
        let bridge = bridge.clone();
        let name = field.name.clone();
        let ty = field.ty.clone();
        Rc::new(move |env: &dyn HostEnv, frame: &CallFrame| {
            let result = (|| -> BridgeResult<HostValue> {
                let handle = this_handle(env, &bridge, frame.this, resource)?;
                let value = bridge
                    .codec(env)
                    .decode(frame.arg(0), &ty)
                    .map_err(|e| e.within(PathSegment::Field(name.clone())))?;
                bridge.handles().with_mut(handle, |this: &mut T| set(this, value))??;
                Ok(HostValue::Undefined)
            })();
            result.map_err(|e| e.to_host(env))
        }) as HostCallback
    });

    AccessorDefinition {
        name: field.name.clone(),
        getter: Some(getter),
        setter,
    }
}

// ============================================================================
// Exported classes
// ============================================================================

type DefinitionFn = Arc<dyn Fn(&Bridge) -> ClassDefinition + Send + Sync>;

/// A finished, type-erased class ready to be defined in a host
#[derive(Clone)]
pub struct ExportedClass {
    name: String,
    resource: ResourceType,
    /// Set when a member's types cannot cross the boundary
    invalid: Option<BridgeError>,
    definition: DefinitionFn,
}

impl ExportedClass {
    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native type backing the instances
    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    /// Define the class in `env` and return its constructor
    pub fn define(&self, env: &dyn HostEnv, bridge: &Bridge) -> BridgeResult<HostValue> {
        if let Some(error) = &self.invalid {
            return Err(error.clone());
        }
        let definition = (self.definition)(bridge);
        tracing::debug!(
            class = %self.name,
            methods = definition.methods.len(),
            statics = definition.static_methods.len(),
            accessors = definition.accessors.len(),
            "defining class"
        );
        env.define_class(definition)
            .map_err(|e| BridgeError::from_host(env, e))
    }
}

impl fmt::Debug for ExportedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedClass")
            .field("name", &self.name)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Expose an existing native value as an instance of the class whose
/// constructor is `constructor`, without running the native constructor.
pub fn wrap_instance<T: Send + Sync + 'static>(
    env: &dyn HostEnv,
    bridge: &Bridge,
    constructor: HostValue,
    value: T,
) -> BridgeResult<HostValue> {
    let host = |r| BridgeError::from_host(env, r);
    let prototype = env.get_property(constructor, "prototype").map_err(host)?;
    let instance = env.create_object_with_prototype(prototype).map_err(host)?;

    let handle = bridge.handles().register_boxed(value)?;
    if let Err(e) = bridge.handles().attach(env, handle, instance) {
        bridge.handles().finalize(handle);
        return Err(e);
    }
    Ok(instance)
}
