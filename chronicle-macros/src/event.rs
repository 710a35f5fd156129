use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Error, LitStr, Result};

/// Finds `#[chronicle(name = "...")]` on the input, if present.
fn registered_name(ast: &DeriveInput) -> Result<String> {
    for attr in &ast.attrs {
        if !attr.path().is_ident("chronicle") {
            continue;
        }
        let mut found = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                found = Some(value.value());
            }
            Ok(())
        })?;
        if let Some(name) = found {
            return Ok(name);
        }
    }
    Ok(ast.ident.to_string())
}

pub fn domain_event_inner(ast: &DeriveInput) -> Result<TokenStream> {
    if !matches!(ast.data, syn::Data::Struct(_)) {
        return Err(Error::new(
            ast.ident.span(),
            "DomainEvent can only be derived for structs; register enum variants individually",
        ));
    }

    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let registered = registered_name(ast)?;

    Ok(quote! {
        impl #impl_generics chronicle::Named for #name #ty_generics #where_clause {
            const NAME: &'static str = #registered;
        }
    })
}
