// #[methods] proc-macro implementation
//
// Discovers the public associated functions of an impl block and generates
// a `ReflectMethods` table for class wrapping by convention:
// - `new` without a receiver is the constructor
// - `&self` / `&mut self` are prototype methods
// - anything else without a receiver is a static method

use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::{ImplItem, ImplItemFn, ItemImpl, Result, Type, Visibility};

use crate::codegen::{
    call_args, camel_case, classify_params, classify_return, convert_return, descriptor_params, extract_params,
    return_tag, ReturnKind,
};

enum Receiver {
    None,
    Shared,
    Exclusive,
}

fn receiver_of(method: &ImplItemFn) -> Result<Receiver> {
    match method.sig.receiver() {
        None => Ok(Receiver::None),
        Some(receiver) if receiver.reference.is_none() => Err(syn::Error::new_spanned(
            receiver,
            "methods taking `self` by value cannot be exported; take `&self` or `&mut self`",
        )),
        Some(receiver) if receiver.mutability.is_some() => Ok(Receiver::Exclusive),
        Some(_) => Ok(Receiver::Shared),
    }
}

/// Generates one `MethodEntry` expression.
fn expand_entry(self_ty: &Type, method: &ImplItemFn) -> Result<TokenStream> {
    let sig = &method.sig;
    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "async methods are not supported by #[methods]; register them with ClassBuilder::async_method",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&sig.generics, "generic methods cannot be exported"));
    }

    let ident = &sig.ident;
    let receiver = receiver_of(method)?;
    let params = classify_params(&sig.inputs)?;
    let returns = classify_return(&sig.output);
    let param_calls = descriptor_params(&params);
    let args = call_args(&params);
    let ctx = quote! { &mut *__ctx };
    let extraction = extract_params(&params, Some(&ctx))?;

    let is_constructor = ident == "new" && matches!(receiver, Receiver::None);
    if is_constructor {
        let construct = match returns {
            ReturnKind::Fallible(_) => quote! {
                <#self_ty>::#ident(#args).map_err(::tether_sdk::BridgeError::from)
            },
            ReturnKind::Value(_) => quote! { Ok(<#self_ty>::#ident(#args)) },
            ReturnKind::Unit => {
                return Err(syn::Error::new_spanned(sig, "constructor `new` must return Self"));
            }
        };
        return Ok(quote! {
            ::tether_sdk::MethodEntry::constructor(
                ::tether_sdk::FunctionDescriptor::new("constructor") #param_calls,
                |__ctx: &mut ::tether_sdk::CallContext<'_>,
                 __args: ::std::vec::Vec<::tether_sdk::NativeValue>|
                 -> ::tether_sdk::BridgeResult<#self_ty> {
                    #extraction
                    #construct
                },
            )
        });
    }

    let host_name = camel_case(&ident.unraw().to_string());
    let return_type = return_tag(&returns);
    let descriptor = quote! {
        ::tether_sdk::FunctionDescriptor::new(#host_name) #param_calls .returns(#return_type)
    };

    let entry = match receiver {
        Receiver::Shared => {
            let call = convert_return(&returns, quote! { __this.#ident(#args) });
            quote! {
                ::tether_sdk::MethodEntry::method(
                    #descriptor,
                    |__ctx: &mut ::tether_sdk::CallContext<'_>,
                     __this: &#self_ty,
                     __args: ::std::vec::Vec<::tether_sdk::NativeValue>|
                     -> ::tether_sdk::BridgeResult<::tether_sdk::NativeValue> {
                        #extraction
                        #call
                    },
                )
            }
        }
        Receiver::Exclusive => {
            let call = convert_return(&returns, quote! { __this.#ident(#args) });
            quote! {
                ::tether_sdk::MethodEntry::method_mut(
                    #descriptor,
                    |__ctx: &mut ::tether_sdk::CallContext<'_>,
                     __this: &mut #self_ty,
                     __args: ::std::vec::Vec<::tether_sdk::NativeValue>|
                     -> ::tether_sdk::BridgeResult<::tether_sdk::NativeValue> {
                        #extraction
                        #call
                    },
                )
            }
        }
        Receiver::None => {
            let call = convert_return(&returns, quote! { <#self_ty>::#ident(#args) });
            quote! {
                ::tether_sdk::MethodEntry::static_method(
                    #descriptor,
                    |__ctx: &mut ::tether_sdk::CallContext<'_>,
                     __args: ::std::vec::Vec<::tether_sdk::NativeValue>|
                     -> ::tether_sdk::BridgeResult<::tether_sdk::NativeValue> {
                        #extraction
                        #call
                    },
                )
            }
        }
    };
    Ok(entry)
}

/// Expands the #[methods] attribute macro.
///
/// The impl block is emitted unchanged, followed by
/// `impl ::tether_sdk::ReflectMethods for Self` listing one entry per
/// public function in declaration order. Private functions are skipped.
pub fn expand_methods(item: ItemImpl) -> Result<TokenStream> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[methods] must be applied to an inherent impl block",
        ));
    }
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "#[methods] does not support generic impl blocks",
        ));
    }

    let self_ty = &item.self_ty;
    let mut entries = Vec::new();
    for impl_item in &item.items {
        if let ImplItem::Fn(method) = impl_item {
            if !matches!(method.vis, Visibility::Public(_)) {
                continue;
            }
            entries.push(expand_entry(self_ty, method)?);
        }
    }

    Ok(quote! {
        #item

        impl ::tether_sdk::ReflectMethods for #self_ty {
            fn method_table() -> ::std::vec::Vec<::tether_sdk::MethodEntry<Self>> {
                ::std::vec![#(#entries),*]
            }
        }
    })
}
