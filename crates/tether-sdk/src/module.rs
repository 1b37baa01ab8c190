//! Native module definition and registration
//!
//! A [`NativeModule`] is an ordered export table built once at module
//! initialization. [`NativeModule::register`] turns it into the host exports
//! object.
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{Bridge, FunctionDescriptor, NativeFunction, NativeModule, NativeValue, TypeTag};
//!
//! let module = NativeModule::new("math").function(NativeFunction::new(
//!     FunctionDescriptor::new("add").param(TypeTag::I32).param(TypeTag::I32).returns(TypeTag::I32),
//!     |_, args| {
//!         let (a, b) = (args[0].as_integer().unwrap_or(0), args[1].as_integer().unwrap_or(0));
//!         Ok(NativeValue::I32((a + b) as i32))
//!     },
//! ));
//! let exports = module.register(env, &Bridge::new())?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::binder::FunctionDescriptor;
use crate::bridge::Bridge;
use crate::class::{self, ExportedClass};
use crate::context::HostEnv;
use crate::error::{BridgeError, BridgeResult, PathSegment};
use crate::function::NativeFunction;
use crate::value::{HostValue, NativeValue, TypeTag};

type InstanceFn = Arc<dyn Fn(&dyn HostEnv, &Bridge, HostValue) -> BridgeResult<HostValue> + Send + Sync>;

#[derive(Clone)]
enum Export {
    Function(NativeFunction),
    Class(ExportedClass),
    Value { value: NativeValue, ty: TypeTag },
    Instance { class: String, make: InstanceFn },
    Namespace(NativeModule),
}

impl Export {
    fn kind(&self) -> &'static str {
        match self {
            Export::Function(_) => "function",
            Export::Class(_) => "class",
            Export::Value { .. } => "value",
            Export::Instance { .. } => "instance",
            Export::Namespace(_) => "namespace",
        }
    }
}

/// Ordered export table of a native module
#[derive(Clone)]
pub struct NativeModule {
    name: String,
    exports: Vec<(String, Export)>,
}

impl NativeModule {
    /// Create an empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.push((name.into(), export));
        self
    }

    /// Export a function under its descriptor name
    pub fn function(self, function: NativeFunction) -> Self {
        let name = function.descriptor().name().to_string();
        self.export(name, Export::Function(function))
    }

    /// Export an async function whose body runs on the worker pool
    pub fn async_function(
        self,
        descriptor: FunctionDescriptor,
        body: impl Fn(Vec<NativeValue>) -> BridgeResult<NativeValue> + Send + Sync + 'static,
    ) -> Self {
        self.function(NativeFunction::new_async(descriptor, body))
    }

    /// Export a class under its class name
    pub fn class(self, class: ExportedClass) -> Self {
        let name = class.name().to_string();
        self.export(name, Export::Class(class))
    }

    /// Export a value serialized with its inferred type
    pub fn value(self, name: impl Into<String>, value: NativeValue) -> Self {
        let ty = value.type_tag();
        self.export(name, Export::Value { value, ty })
    }

    /// Export a value serialized as `ty`
    pub fn typed_value(self, name: impl Into<String>, value: NativeValue, ty: TypeTag) -> Self {
        self.export(name, Export::Value { value, ty })
    }

    /// Export a native value as an instance of class `class`, which must be
    /// exported by this module or an enclosing one
    pub fn instance<T: Clone + Send + Sync + 'static>(
        self,
        name: impl Into<String>,
        class: impl Into<String>,
        value: T,
    ) -> Self {
        let make: InstanceFn = Arc::new(move |env: &dyn HostEnv, bridge: &Bridge, constructor| {
            class::wrap_instance(env, bridge, constructor, value.clone())
        });
        self.export(
            name,
            Export::Instance {
                class: class.into(),
                make,
            },
        )
    }

    /// Export a nested module as a namespace object
    pub fn namespace(self, name: impl Into<String>, module: NativeModule) -> Self {
        self.export(name, Export::Namespace(module))
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export names in declaration order
    pub fn export_names(&self) -> Vec<&str> {
        self.exports.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of exports
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Whether the module exports nothing
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Whether every export is a plain serialized value
    pub fn is_export_object(&self) -> bool {
        self.exports
            .iter()
            .all(|(_, export)| matches!(export, Export::Value { .. }))
    }

    /// Build the host exports object.
    ///
    /// Classes are defined first so instance exports can refer to them
    /// regardless of declaration order.
    pub fn register(&self, env: &dyn HostEnv, bridge: &Bridge) -> BridgeResult<HostValue> {
        tracing::debug!(module = %self.name, exports = self.exports.len(), "registering native module");
        self.register_in(env, bridge, HashMap::new())
    }

    fn register_in(
        &self,
        env: &dyn HostEnv,
        bridge: &Bridge,
        mut classes: HashMap<String, HostValue>,
    ) -> BridgeResult<HostValue> {
        for (_, export) in &self.exports {
            if let Export::Class(class) = export {
                let constructor = class.define(env, bridge)?;
                classes.insert(class.name().to_string(), constructor);
            }
        }

        let host = |e| BridgeError::from_host(env, e);
        let exports = env.create_object().map_err(host)?;
        for (name, export) in &self.exports {
            tracing::trace!(module = %self.name, export = %name, kind = export.kind(), "exporting");
            let value = match export {
                Export::Function(function) => function.create(env, bridge)?,
                Export::Class(class) => classes
                    .get(class.name())
                    .copied()
                    .ok_or_else(|| BridgeError::Native(format!("class {} was not defined", class.name())))?,
                Export::Value { value, ty } => bridge
                    .codec(env)
                    .encode(value, ty)
                    .map_err(|e| e.within(PathSegment::Field(name.clone())))?,
                Export::Instance { class, make } => {
                    let constructor = classes.get(class).copied().ok_or_else(|| {
                        BridgeError::Native(format!("instance {} refers to unknown class {}", name, class))
                    })?;
                    make(env, bridge, constructor)?
                }
                Export::Namespace(module) => module.register_in(env, bridge, classes.clone())?,
            };
            env.set_property(exports, name, value).map_err(host)?;
        }
        Ok(exports)
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field(
                "exports",
                &self
                    .exports
                    .iter()
                    .map(|(name, export)| format!("{} {}", export.kind(), name))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
