//! `#[derive(State)]`: drain/hydrate and query-param plumbing for structs
//! whose reactive fields are `Signal<T>`s.
//!
//! ```ignore
//! #[derive(State)]
//! #[state(version = 2)]
//! struct SearchState {
//!     #[state(query_param = "q")]
//!     query: Signal<String>,
//!     #[state(query_param)]
//!     page: Signal<i64>,
//!     results: Signal<Vec<String>>,
//!     #[state(skip)]
//!     scratch: Signal<u64>,
//! }
//! ```
//!
//! Every `Signal<T>` field is drained/hydrated through `serde_json` unless
//! marked `#[state(skip)]`; non-signal fields are left alone. Fields marked
//! `#[state(query_param)]` additionally sync with the URL query string
//! through their `QueryParamCodec`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitInt, LitStr, Type};

#[proc_macro_derive(State, attributes(state))]
pub fn derive_state(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct StateField {
    ident: syn::Ident,
    name: String,
    query_param: Option<String>,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_ident = &input.ident;

    let mut version: u32 = 1;
    for attr in &input.attrs {
        if attr.path().is_ident("state") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("version") {
                    let lit: LitInt = meta.value()?.parse()?;
                    version = lit.base10_parse()?;
                    Ok(())
                } else {
                    Err(meta.error("unknown `state` attribute on struct"))
                }
            })?;
        }
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    struct_ident,
                    "State can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_ident,
                "State can only be derived for structs",
            ))
        }
    };

    let mut state_fields: Vec<StateField> = Vec::new();
    for field in fields {
        if !is_signal(&field.ty) {
            continue;
        }
        let ident = field.ident.clone().expect("named field");
        let mut skip = false;
        let mut query_param: Option<String> = None;
        for attr in &field.attrs {
            if attr.path().is_ident("state") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("skip") {
                        skip = true;
                        Ok(())
                    } else if meta.path.is_ident("query_param") {
                        if meta.input.peek(syn::Token![=]) {
                            let lit: LitStr = meta.value()?.parse()?;
                            query_param = Some(lit.value());
                        } else {
                            query_param = Some(ident.to_string());
                        }
                        Ok(())
                    } else {
                        Err(meta.error("unknown `state` attribute on field"))
                    }
                })?;
            }
        }
        if skip {
            continue;
        }
        state_fields.push(StateField {
            name: ident.to_string(),
            ident,
            query_param,
        });
    }

    let drain_fields = state_fields.iter().map(|field| {
        let ident = &field.ident;
        let name = &field.name;
        quote! {
            values.insert(
                #name.to_string(),
                ::serde_json::to_value(self.#ident.peek()).map_err(|source| {
                    ::tether_core::state::StateError::Serialize {
                        field: #name.to_string(),
                        source,
                    }
                })?,
            );
        }
    });

    let hydrate_fields = state_fields.iter().map(|field| {
        let ident = &field.ident;
        let name = &field.name;
        quote! {
            if let ::core::option::Option::Some(value) = values.remove(#name) {
                let decoded = ::serde_json::from_value(value).map_err(|source| {
                    ::tether_core::state::StateError::Deserialize {
                        field: #name.to_string(),
                        source,
                    }
                })?;
                self.#ident.set(decoded);
            }
        }
    });

    let query_param_fields = state_fields
        .iter()
        .filter_map(|field| field.query_param.as_ref().map(|param| (field, param)))
        .map(|(field, param)| {
            let ident = &field.ident;
            quote! {
                {
                    let read_signal = self.#ident.clone();
                    let write_signal = self.#ident.clone();
                    let clear_signal = self.#ident.clone();
                    fields.push(::tether_core::state::QueryParamField {
                        name: #param.to_string(),
                        read: ::std::boxed::Box::new(move || {
                            // Tracked so URL-sync effects re-run on change.
                            let encoded = read_signal.with(|value| {
                                ::tether_core::state::QueryParamCodec::encode(value)
                            });
                            if encoded.is_empty() {
                                ::core::option::Option::None
                            } else {
                                ::core::option::Option::Some(encoded)
                            }
                        }),
                        write: ::std::boxed::Box::new(move |text| {
                            let value = ::tether_core::state::QueryParamCodec::decode(text)
                                .map_err(|source| {
                                    ::tether_core::state::StateError::QueryParam {
                                        param: #param.to_string(),
                                        source,
                                    }
                                })?;
                            write_signal.set(value);
                            ::core::result::Result::Ok(())
                        }),
                        clear: ::std::boxed::Box::new(move || {
                            if let ::core::result::Result::Ok(value) =
                                ::tether_core::state::QueryParamCodec::decode("")
                            {
                                clear_signal.set(value);
                            }
                        }),
                    });
                }
            }
        });

    Ok(quote! {
        impl ::tether_core::state::State for #struct_ident {
            fn state_version() -> u32 {
                #version
            }

            fn drain(
                &self,
            ) -> ::core::result::Result<
                ::tether_core::state::StateSnapshot,
                ::tether_core::state::StateError,
            > {
                let mut values = ::serde_json::Map::new();
                #(#drain_fields)*
                ::core::result::Result::Ok(::tether_core::state::StateSnapshot {
                    version: #version,
                    values,
                })
            }

            fn hydrate(
                &self,
                snapshot: ::tether_core::state::StateSnapshot,
            ) -> ::core::result::Result<(), ::tether_core::state::StateError> {
                let target = #version;
                if snapshot.version > target {
                    return ::core::result::Result::Err(
                        ::tether_core::state::StateError::VersionTooNew {
                            found: snapshot.version,
                            supported: target,
                        },
                    );
                }
                let mut values = snapshot.values;
                if snapshot.version != target {
                    values =
                        ::tether_core::state::State::migrate(self, snapshot.version, target, values);
                }
                #(#hydrate_fields)*
                ::tether_core::state::State::post_init(self);
                ::core::result::Result::Ok(())
            }

            fn query_params(&self) -> ::std::vec::Vec<::tether_core::state::QueryParamField> {
                #[allow(unused_mut)]
                let mut fields: ::std::vec::Vec<::tether_core::state::QueryParamField> =
                    ::std::vec::Vec::new();
                #(#query_param_fields)*
                fields
            }
        }
    })
}

fn is_signal(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Signal")
            .unwrap_or(false),
        _ => false,
    }
}
