use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let args = match parse_message_args(&input) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };

    // Default: the Rust type name
    let message_name = args.name.unwrap_or_else(|| name.to_string());

    // Default: the module path of the deriving type, dotted
    let namespace = match args.namespace {
        Some(ns) => quote! { #ns.to_string() },
        None => quote! { module_path!().replace("::", ".") },
    };

    let entity = args.entity.map(|entity| {
        quote! {
            fn entity_name() -> Option<String> {
                Some(#entity.to_string())
            }
        }
    });

    let message_types = if args.also.is_empty() {
        None
    } else {
        let also = &args.also;
        Some(quote! {
            fn message_types() -> Vec<String> {
                let mut types = vec![<Self as ::sourced_bus::Message>::message_urn()];
                #( types.push(#also.to_string()); )*
                types
            }
        })
    };

    let expanded = quote! {
        impl #impl_generics ::sourced_bus::Message for #name #ty_generics #where_clause {
            fn message_name() -> String {
                #message_name.to_string()
            }

            fn message_namespace() -> String {
                #namespace
            }

            #message_types

            #entity
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct MessageArgs {
    name: Option<String>,
    namespace: Option<String>,
    entity: Option<String>,
    also: Vec<String>,
}

fn parse_message_args(input: &DeriveInput) -> syn::Result<MessageArgs> {
    let mut args = MessageArgs::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let value: LitStr = meta.value()?.parse()?;
            if meta.path.is_ident("name") {
                args.name = Some(value.value());
            } else if meta.path.is_ident("namespace") {
                args.namespace = Some(value.value());
            } else if meta.path.is_ident("entity") {
                args.entity = Some(value.value());
            } else if meta.path.is_ident("also") {
                let urn = value.value();
                if !urn.starts_with("urn:message:") {
                    return Err(meta.error("`also` must be a full message URN (urn:message:...)"));
                }
                args.also.push(urn);
            } else {
                return Err(meta.error("unsupported message attribute"));
            }
            Ok(())
        })?;
    }

    Ok(args)
}
