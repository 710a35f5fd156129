mod event;

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Derives the `Named` trait for a struct, binding it to the registered
/// event-type name used by the `Encoder` port's registry.
///
/// By default the registered name is the struct's own identifier. Use
/// `#[chronicle(name = "...")]` to register under a different name (useful
/// when renaming a struct without breaking previously-persisted events).
///
/// # Example
///
/// ```rust
/// use chronicle_macros::DomainEvent;
///
/// #[derive(DomainEvent, serde::Serialize, serde::Deserialize)]
/// struct AccountOpened {
///     balance: i64,
/// }
/// ```
#[proc_macro_derive(DomainEvent, attributes(chronicle))]
pub fn domain_event(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    event::domain_event_inner(&ast)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
