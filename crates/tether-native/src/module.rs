// #[module] proc-macro implementation
//
// Generates the registration entry point of a native module.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemFn, Result, ReturnType, Type};

/// Expands the #[module] attribute macro.
///
/// Input: Init function that returns NativeModule
/// Output: The init function plus a `register` entry point building the
/// host exports object
///
/// Example expansion:
/// ```ignore
/// // Input:
/// #[module]
/// fn init() -> NativeModule {
///     NativeModule::new("math").function(add_native())
/// }
///
/// // Output:
/// fn init() -> NativeModule {
///     NativeModule::new("math").function(add_native())
/// }
///
/// pub fn register(
///     env: &dyn ::tether_sdk::HostEnv,
///     bridge: &::tether_sdk::Bridge,
/// ) -> ::tether_sdk::BridgeResult<::tether_sdk::HostValue> {
///     init().register(env, bridge)
/// }
/// ```
pub fn expand_module(func: ItemFn) -> Result<TokenStream> {
    let sig = &func.sig;
    if sig.ident != "init" {
        return Err(syn::Error::new_spanned(&sig.ident, "#[module] expects `fn init() -> NativeModule`"));
    }
    if !sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(&sig.inputs, "`init` takes no parameters"));
    }
    if !returns_native_module(&sig.output) {
        return Err(syn::Error::new_spanned(&sig.output, "`init` must return NativeModule"));
    }

    Ok(quote! {
        #func

        /// Build this module's exports object in `env`.
        pub fn register(
            env: &dyn ::tether_sdk::HostEnv,
            bridge: &::tether_sdk::Bridge,
        ) -> ::tether_sdk::BridgeResult<::tether_sdk::HostValue> {
            init().register(env, bridge)
        }
    })
}

fn returns_native_module(output: &ReturnType) -> bool {
    match output {
        ReturnType::Type(_, ty) => match &**ty {
            Type::Path(path) => path.path.segments.last().is_some_and(|s| s.ident == "NativeModule"),
            _ => false,
        },
        ReturnType::Default => false,
    }
}
