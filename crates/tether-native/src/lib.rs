// tether-native: procedural macros for tether native modules
//
// Provides:
// - #[function] - Builds a NativeFunction from a plain Rust function
// - #[derive(Reflect)] - Struct shape, field access and value conversions
// - #[methods] - Method discovery by naming convention for class wrapping
// - #[module] - Registration entry point for a module init function
//
// Example:
// ```
// use tether_native::{function, methods, module, Reflect};
// use tether_sdk::{ClassBuilder, NativeModule};
//
// #[function]
// fn add(a: i32, b: i32) -> i32 {
//     a + b
// }
//
// #[derive(Clone, Reflect)]
// #[reflect(methods)]
// struct Counter {
//     count: u32,
// }
//
// #[methods]
// impl Counter {
//     pub fn new(count: u32) -> Self {
//         Counter { count }
//     }
//
//     pub fn increment(&mut self) {
//         self.count += 1;
//     }
// }
//
// #[module]
// fn init() -> NativeModule {
//     NativeModule::new("math")
//         .function(add_native())
//         .class(ClassBuilder::<Counter>::by_convention("Counter").build())
// }
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput, ItemFn, ItemImpl};

mod codegen;
mod function;
mod methods;
mod module;
mod reflect;

/// Exports a plain Rust function through a generated `NativeFunction`.
///
/// Generates `<name>_native() -> tether_sdk::NativeFunction` whose
/// descriptor is derived from the signature:
/// - Parameters are decoded with their `NativeType` tag (`FromNative`)
/// - An `Allocator` parameter becomes an allocator slot
/// - A `&mut CallContext` parameter receives the call context
/// - The return value is encoded with `IntoNative`; `Result` errors are
///   thrown to the host
///
/// The host name is the camelCase form of the Rust name unless overridden
/// with `#[function(name = "...")]`. `#[function(worker)]` runs the body on
/// the worker pool and returns a promise.
///
/// # Example
///
/// ```ignore
/// #[function]
/// fn greet(name: String) -> String {
///     format!("Hello, {}!", name)
/// }
///
/// let module = NativeModule::new("greeter").function(greet_native());
/// ```
#[proc_macro_attribute]
pub fn function(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    function::FunctionOptions::parse(attr.into())
        .and_then(|options| function::expand_function(options, input))
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derives `Reflect`, `NativeType`, `IntoNative` and `FromNative` for a
/// struct with named fields.
///
/// Fields starting with `_` are private. `#[reflect(methods)]` exposes the
/// table generated by `#[methods]` through `Reflect::methods`.
#[proc_macro_derive(Reflect, attributes(reflect))]
pub fn derive_reflect(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    reflect::expand_reflect(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Generates a `ReflectMethods` table from the public functions of an
/// inherent impl block.
///
/// `new` becomes the constructor, `&self` and `&mut self` functions become
/// prototype methods and the remaining functions become static methods.
/// Names are converted to camelCase.
#[proc_macro_attribute]
pub fn methods(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemImpl);
    methods::expand_methods(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Turns a module `init` function into a host registration entry point.
///
/// Applies to `fn init() -> NativeModule` only.
/// Generates `register(env, bridge)`, which builds the exports object.
///
/// # Example
///
/// ```ignore
/// #[module]
/// fn init() -> NativeModule {
///     NativeModule::new("math").function(add_native())
/// }
///
/// let exports = register(env, &Bridge::new())?;
/// ```
#[proc_macro_attribute]
pub fn module(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    module::expand_module(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
