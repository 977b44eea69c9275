//! Procedural macros used by `granary`

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive the `metrics_set` method for a struct whose named fields are all metrics,
/// the `Count` or `Time` defined in `granary::metric`. Each field is reported under
/// its own name
#[proc_macro_derive(MetricsSetBuilder)]
pub fn metrics_set_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;

    let insert_recursion = insert_recursion(&input.data);

    let expanded = quote!(
        impl #name {
            /// Snapshot the metrics into a [`MetricsSet`](crate::metric::MetricsSet)
            pub fn metrics_set(&self) -> crate::metric::MetricsSet {
                let mut metrics = ::std::collections::BTreeMap::new();
                #insert_recursion
                crate::metric::MetricsSet {
                    name: stringify!(#name),
                    metrics,
                }
            }
        }
    );

    expanded.into()
}

fn insert_recursion(data: &Data) -> proc_macro2::TokenStream {
    match *data {
        Data::Struct(ref ds) => match ds.fields {
            Fields::Named(ref fields) => {
                let recurse = fields.named.iter().map(|f| {
                    let field_name = f.ident.as_ref().expect("Named field must have ident");
                    let f_ty = &f.ty;
                    quote! {
                        metrics.insert(
                            stringify!(#field_name),
                            crate::metric::MetricValue::#f_ty(self.#field_name.value()),
                        );
                    }
                });
                quote! {
                    #(#recurse)*
                }
            }
            _ => panic!("MetricsSetBuilder can only be derived for structs with named fields"),
        },
        Data::Enum(_) | Data::Union(_) => {
            panic!("MetricsSetBuilder can only be derived for structs with named fields")
        }
    }
}
