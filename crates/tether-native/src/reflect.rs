// #[derive(Reflect)] implementation
//
// Generates the struct shape, field access and value conversions used to
// serialize a struct and to wrap it as a class by convention. Fields whose
// name starts with `_` are private: they are neither serialized nor exposed
// and are filled with `Default::default()` when decoding.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Result};

/// Options read from `#[reflect(...)]` on the struct.
#[derive(Default)]
struct ReflectOptions {
    /// Hook `Reflect::methods` up to the `#[methods]` table
    methods: bool,
}

fn parse_options(input: &DeriveInput) -> Result<ReflectOptions> {
    let mut options = ReflectOptions::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("reflect")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("methods") {
                options.methods = true;
                Ok(())
            } else {
                Err(meta.error("unknown reflect option, expected `methods`"))
            }
        })?;
    }
    Ok(options)
}

/// Expands `#[derive(Reflect)]`.
pub fn expand_reflect(input: DeriveInput) -> Result<TokenStream> {
    let options = parse_options(&input)?;
    let name = &input.ident;
    let name_str = name.to_string();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "Reflect can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Reflect can only be derived for structs",
            ))
        }
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Reflect cannot be derived for generic structs",
        ));
    }

    let mut public = Vec::new();
    let mut private = Vec::new();
    for field in fields {
        let ident = field.ident.as_ref().ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
        if ident.to_string().starts_with('_') {
            private.push(ident);
        } else {
            public.push((ident, &field.ty));
        }
    }

    let keys: Vec<String> = public.iter().map(|(ident, _)| ident.to_string()).collect();
    let idents: Vec<_> = public.iter().map(|(ident, _)| *ident).collect();
    let types: Vec<_> = public.iter().map(|(_, ty)| *ty).collect();

    // One slot per public field; the first occurrence of a key wins.
    let slots: Vec<_> = (0..public.len()).map(|i| format_ident!("__field{}", i)).collect();
    let decode = if public.is_empty() {
        quote! {
            ::tether_sdk::NativeValue::Struct(_) => Ok(Self {
                #(#private: ::std::default::Default::default(),)*
            }),
        }
    } else {
        quote! {
            ::tether_sdk::NativeValue::Struct(fields) => {
                #(let mut #slots: ::std::option::Option<::tether_sdk::NativeValue> = ::std::option::Option::None;)*
                for (key, value) in fields {
                    match key.as_str() {
                        #(#keys if #slots.is_none() => #slots = ::std::option::Option::Some(value),)*
                        _ => {}
                    }
                }
                Ok(Self {
                    #(#idents: ::tether_sdk::FromNative::from_native(#slots.unwrap_or_default())
                        .map_err(|e| e.within(::tether_sdk::PathSegment::Field(#keys.to_string())))?,)*
                    #(#private: ::std::default::Default::default(),)*
                })
            }
        }
    };

    let methods = if options.methods {
        quote! {
            fn methods() -> ::std::vec::Vec<::tether_sdk::MethodEntry<Self>> {
                <Self as ::tether_sdk::ReflectMethods>::method_table()
            }
        }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl ::tether_sdk::Reflect for #name {
            fn shape() -> ::tether_sdk::StructShape {
                ::tether_sdk::StructShape::new(#name_str)
                    #(.field(#keys, <#types as ::tether_sdk::NativeType>::type_tag()))*
            }

            fn get_field(&self, name: &str) -> ::std::option::Option<::tether_sdk::NativeValue> {
                match name {
                    #(#keys => ::std::option::Option::Some(
                        ::tether_sdk::IntoNative::into_native(::std::clone::Clone::clone(&self.#idents)),
                    ),)*
                    _ => ::std::option::Option::None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: ::tether_sdk::NativeValue,
            ) -> ::tether_sdk::BridgeResult<()> {
                match (name, value) {
                    #((#keys, value) => {
                        self.#idents = ::tether_sdk::FromNative::from_native(value)
                            .map_err(|e| e.within(::tether_sdk::PathSegment::Field(#keys.to_string())))?;
                        Ok(())
                    })*
                    (name, _) => Err(::tether_sdk::BridgeError::MissingField {
                        at: ::tether_sdk::ValuePath::root(),
                        field: name.to_string(),
                    }),
                }
            }

            #methods
        }

        impl ::tether_sdk::NativeType for #name {
            fn type_tag() -> ::tether_sdk::TypeTag {
                ::tether_sdk::TypeTag::Struct(<Self as ::tether_sdk::Reflect>::shape())
            }
        }

        impl ::tether_sdk::IntoNative for #name {
            fn into_native(self) -> ::tether_sdk::NativeValue {
                ::tether_sdk::NativeValue::Struct(::std::vec![
                    #((#keys.to_string(), ::tether_sdk::IntoNative::into_native(self.#idents)),)*
                ])
            }
        }

        impl ::tether_sdk::FromNative for #name {
            fn from_native(value: ::tether_sdk::NativeValue) -> ::tether_sdk::BridgeResult<Self> {
                match value {
                    #decode
                    other => Err(::tether_sdk::BridgeError::mismatch(#name_str, other.type_name())),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_fields_are_skipped() {
        let input: DeriveInput = syn::parse_quote! {
            #[reflect(methods)]
            struct TestClass {
                foo: i32,
                bar: String,
                _cache: Vec<u8>,
            }
        };
        let out = expand_reflect(input).unwrap().to_string();
        assert!(out.contains("\"foo\""));
        assert!(out.contains("\"bar\""));
        assert!(!out.contains("\"_cache\""));
        assert!(out.contains("method_table"));
    }

    #[test]
    fn test_generated_code_has_no_discarded_bindings() {
        let input: DeriveInput = syn::parse_quote! {
            struct Point {
                x: i32,
                y: i32,
            }
        };
        let out = expand_reflect(input).unwrap().to_string();
        assert!(!out.contains("let _"), "{}", out);
        assert!(out.contains("__field1"));

        let input: DeriveInput = syn::parse_quote! {
            struct Opaque {
                _state: u64,
            }
        };
        let out = expand_reflect(input).unwrap().to_string();
        assert!(!out.contains("let _"), "{}", out);
        assert!(!out.contains("__field0"));
    }

    #[test]
    fn test_rejects_enums_and_tuples() {
        let input: DeriveInput = syn::parse_quote! { enum E { A } };
        assert!(expand_reflect(input).is_err());
        let input: DeriveInput = syn::parse_quote! { struct T(u32); };
        assert!(expand_reflect(input).is_err());
    }

    #[test]
    fn test_unknown_option() {
        let input: DeriveInput = syn::parse_quote! {
            #[reflect(bogus)]
            struct S { a: u8 }
        };
        assert!(expand_reflect(input).is_err());
    }
}
