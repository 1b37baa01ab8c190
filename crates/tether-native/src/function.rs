// #[function] proc-macro implementation
//
// Generates a `NativeFunction` constructor for a plain Rust function.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::punctuated::Punctuated;
use syn::{ItemFn, Meta, Result, Token};

use crate::codegen::{
    call_args, camel_case, classify_params, classify_return, convert_return, descriptor_params, extract_params,
    return_tag,
};

/// Options accepted by `#[function(...)]`.
#[derive(Default)]
pub struct FunctionOptions {
    /// Host-visible name override
    pub name: Option<String>,
    /// Run the body on the worker pool and return a promise
    pub worker: bool,
}

impl FunctionOptions {
    pub fn parse(attr: TokenStream) -> Result<Self> {
        let mut options = FunctionOptions::default();
        if attr.is_empty() {
            return Ok(options);
        }
        let metas = syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, attr)?;
        for meta in metas {
            match &meta {
                Meta::Path(path) if path.is_ident("worker") => options.worker = true,
                Meta::NameValue(nv) if nv.path.is_ident("name") => match &nv.value {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(lit), ..
                    }) => options.name = Some(lit.value()),
                    other => return Err(syn::Error::new_spanned(other, "expected a string literal")),
                },
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "unknown #[function] option, expected `worker` or `name = \"...\"`",
                    ))
                }
            }
        }
        Ok(options)
    }
}

/// Expands the #[function] attribute macro.
///
/// Example expansion:
/// ```ignore
/// // Input:
/// #[function]
/// fn fn_with_serialized_params(a: i32, b: bool) -> i32 { ... }
///
/// // Output:
/// fn fn_with_serialized_params(a: i32, b: bool) -> i32 { ... }
///
/// fn fn_with_serialized_params_native() -> ::tether_sdk::NativeFunction {
///     ::tether_sdk::NativeFunction::new(
///         ::tether_sdk::FunctionDescriptor::new("fnWithSerializedParams")
///             .param(<i32 as ::tether_sdk::NativeType>::type_tag())
///             .param(<bool as ::tether_sdk::NativeType>::type_tag())
///             .returns(<i32 as ::tether_sdk::NativeType>::type_tag()),
///         |__ctx, __args| { /* extract, call, convert */ },
///     )
/// }
/// ```
pub fn expand_function(options: FunctionOptions, func: ItemFn) -> Result<TokenStream> {
    let func_name = &func.sig.ident;
    let vis = &func.vis;
    let ctor_name = format_ident!("{}_native", func_name);
    let host_name = options.name.clone().unwrap_or_else(|| camel_case(&func_name.unraw().to_string()));

    if func.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            func.sig.asyncness,
            "async fn is not supported; use #[function(worker)] to run a blocking body off the host thread",
        ));
    }
    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "generic functions cannot be exported",
        ));
    }
    if let Some(receiver) = func.sig.receiver() {
        return Err(syn::Error::new_spanned(
            receiver,
            "methods (self) are not supported in #[function]; use #[methods] on the impl block",
        ));
    }

    let params = classify_params(&func.sig.inputs)?;
    let returns = classify_return(&func.sig.output);
    let param_calls = descriptor_params(&params);
    let return_type = return_tag(&returns);
    let args = call_args(&params);
    let call = convert_return(&returns, quote! { #func_name(#args) });

    let constructor = if options.worker {
        let extraction = extract_params(&params, None)?;
        quote! {
            ::tether_sdk::NativeFunction::new_async(
                ::tether_sdk::FunctionDescriptor::new(#host_name)
                    #param_calls
                    .returns(#return_type),
                |__args: ::std::vec::Vec<::tether_sdk::NativeValue>| -> ::tether_sdk::BridgeResult<::tether_sdk::NativeValue> {
                    #extraction
                    #call
                },
            )
        }
    } else {
        let ctx = quote! { &mut *__ctx };
        let extraction = extract_params(&params, Some(&ctx))?;
        quote! {
            ::tether_sdk::NativeFunction::new(
                ::tether_sdk::FunctionDescriptor::new(#host_name)
                    #param_calls
                    .returns(#return_type),
                |__ctx: &mut ::tether_sdk::CallContext<'_>,
                 __args: ::std::vec::Vec<::tether_sdk::NativeValue>|
                 -> ::tether_sdk::BridgeResult<::tether_sdk::NativeValue> {
                    #extraction
                    #call
                },
            )
        }
    };

    let doc = format!("Native export `{}` for [`{}`].", host_name, func_name);
    Ok(quote! {
        #func

        #[doc = #doc]
        #vis fn #ctor_name() -> ::tether_sdk::NativeFunction {
            #constructor
        }
    })
}
