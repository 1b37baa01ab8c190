// Shared code generation for the tether proc-macros
//
// Parameters and return types are classified once here so #[function] and
// #[methods] build identical descriptors and argument extraction.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, GenericArgument, Ident, PathArguments, ReturnType, Type};

/// Converts a Rust `snake_case` identifier to the host's `camelCase`.
pub fn camel_case(name: &str) -> String {
    let trimmed = name.trim_start_matches('_');
    let mut out = String::with_capacity(trimmed.len());
    let mut upper = false;
    for ch in trimmed.chars() {
        if ch == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Last path segment of a type, if it is a plain path.
fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last(),
        Type::Group(group) => last_segment(&group.elem),
        _ => None,
    }
}

/// How one function parameter is filled.
pub enum ParamKind {
    /// Decoded from the next host argument
    Value(Box<Type>),
    /// Filled from the allocator slot
    Allocator(Box<Type>),
    /// The `&mut CallContext` of the call
    Context,
}

/// A typed, named parameter.
pub struct ParamInfo {
    pub name: Ident,
    pub kind: ParamKind,
}

/// Classifies the typed parameters of a signature (receivers are skipped).
pub fn classify_params<'a>(inputs: impl IntoIterator<Item = &'a FnArg>) -> syn::Result<Vec<ParamInfo>> {
    let mut params = Vec::new();
    for (i, arg) in inputs.into_iter().enumerate() {
        let pat_type = match arg {
            FnArg::Typed(pat_type) => pat_type,
            FnArg::Receiver(_) => continue,
        };
        let name = match &*pat_type.pat {
            syn::Pat::Ident(pat_ident) => pat_ident.ident.clone(),
            syn::Pat::Wild(_) => format_ident!("__arg{}", i),
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "only simple identifiers are supported as arguments",
                ))
            }
        };

        let ty = &pat_type.ty;
        let kind = match &**ty {
            Type::Reference(reference)
                if last_segment(&reference.elem).map(|s| s.ident == "CallContext").unwrap_or(false) =>
            {
                if reference.mutability.is_none() {
                    return Err(syn::Error::new_spanned(ty, "CallContext must be taken as `&mut CallContext`"));
                }
                ParamKind::Context
            }
            _ if last_segment(ty).map(|s| s.ident == "Allocator").unwrap_or(false) => {
                ParamKind::Allocator(ty.clone())
            }
            Type::Reference(_) => {
                return Err(syn::Error::new_spanned(
                    ty,
                    "borrowed parameters are not supported; take the value by ownership",
                ))
            }
            _ => ParamKind::Value(ty.clone()),
        };
        params.push(ParamInfo { name, kind });
    }
    Ok(params)
}

/// Builder calls appending the parameters to a `FunctionDescriptor`.
pub fn descriptor_params(params: &[ParamInfo]) -> TokenStream {
    let calls = params.iter().filter_map(|p| match &p.kind {
        ParamKind::Value(ty) => Some(quote! {
            .param(<#ty as ::tether_sdk::NativeType>::type_tag())
        }),
        ParamKind::Allocator(_) => Some(quote! { .allocator() }),
        ParamKind::Context => None,
    });
    quote! { #(#calls)* }
}

/// Statements binding each parameter from the `__args` vector.
///
/// `ctx` is the expression passed for a `&mut CallContext` parameter, or
/// `None` when the body runs without one.
pub fn extract_params(params: &[ParamInfo], ctx: Option<&TokenStream>) -> syn::Result<TokenStream> {
    let bound = params
        .iter()
        .filter(|p| !matches!(p.kind, ParamKind::Context))
        .count();

    let mut position = 0usize;
    let mut statements = Vec::new();
    for param in params {
        let name = &param.name;
        match &param.kind {
            ParamKind::Context => {
                let ctx = ctx.ok_or_else(|| {
                    syn::Error::new_spanned(name, "CallContext is not available in worker-thread bodies")
                })?;
                statements.push(quote! { let #name = #ctx; });
            }
            ParamKind::Value(ty) => {
                let index = position;
                statements.push(quote! {
                    let #name: #ty = ::tether_sdk::FromNative::from_native(
                        __args.next().unwrap_or_default(),
                    )
                    .map_err(|e| e.within(::tether_sdk::PathSegment::Argument(#index)))?;
                });
                position += 1;
            }
            // Allocator slots are not host arguments.
            ParamKind::Allocator(ty) => {
                statements.push(quote! {
                    let #name: #ty = ::tether_sdk::FromNative::from_native(
                        __args.next().unwrap_or_default(),
                    )?;
                });
            }
        }
    }

    let iterator = if bound == 0 {
        quote! { let _ = __args; }
    } else {
        quote! { let mut __args = __args.into_iter(); }
    };
    Ok(quote! {
        #iterator
        #(#statements)*
    })
}

/// Argument list passed to the user function.
pub fn call_args(params: &[ParamInfo]) -> TokenStream {
    let names = params.iter().map(|p| &p.name);
    quote! { #(#names),* }
}

/// Declared return of a function.
pub enum ReturnKind {
    /// No return type
    Unit,
    /// Plain value
    Value(Box<Type>),
    /// `Result<T, E>` or `BridgeResult<T>`
    Fallible(Box<Type>),
}

/// Classifies a return type, unwrapping `Result`-like types.
pub fn classify_return(output: &ReturnType) -> ReturnKind {
    let ty = match output {
        ReturnType::Default => return ReturnKind::Unit,
        ReturnType::Type(_, ty) => ty,
    };
    if let Some(segment) = last_segment(ty) {
        if segment.ident == "Result" || segment.ident == "BridgeResult" {
            if let PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(GenericArgument::Type(inner)) = args.args.first() {
                    return ReturnKind::Fallible(Box::new(inner.clone()));
                }
            }
        }
    }
    ReturnKind::Value(ty.clone())
}

/// Type tag expression for a return kind.
pub fn return_tag(kind: &ReturnKind) -> TokenStream {
    match kind {
        ReturnKind::Unit => quote! { ::tether_sdk::TypeTag::Void },
        ReturnKind::Value(ty) | ReturnKind::Fallible(ty) => {
            quote! { <#ty as ::tether_sdk::NativeType>::type_tag() }
        }
    }
}

/// Expression converting the result of `call` into `BridgeResult<NativeValue>`.
pub fn convert_return(kind: &ReturnKind, call: TokenStream) -> TokenStream {
    match kind {
        ReturnKind::Unit => quote! {{
            #call;
            Ok(::tether_sdk::NativeValue::Void)
        }},
        ReturnKind::Value(_) => quote! {
            Ok(::tether_sdk::IntoNative::into_native(#call))
        },
        ReturnKind::Fallible(_) => quote! {
            (#call)
                .map(::tether_sdk::IntoNative::into_native)
                .map_err(::tether_sdk::BridgeError::from)
        },
    }
}
