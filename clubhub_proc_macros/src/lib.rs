use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Derives `changed_fields()` and `has_changes()` for partial-update structs.
///
/// Every `Option` field counts as changed when it is `Some`. Names are reported
/// in camelCase so they match the JSON the struct was deserialized from.
/// Non-`Option` fields are ignored.
#[proc_macro_derive(ChangedFields)]
pub fn changed_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;

    let syn::Data::Struct(syn::DataStruct { fields: syn::Fields::Named(fields), .. }) = &input.data else {
        return syn::Error::new_spanned(struct_name, "ChangedFields supports only structs with named fields")
            .to_compile_error()
            .into();
    };

    let checks = fields.named.iter()
        .filter(|field| is_option(&field.ty))
        .filter_map(|field| {
            let field_name = field.ident.as_ref()?;
            let json_name = camel_case(&field_name.to_string());
            Some(quote! {
                if self.#field_name.is_some() {
                    fields.push(#json_name);
                }
            })
        });

    let expanded = quote! {
        impl #struct_name {
            pub fn changed_fields(&self) -> Vec<&'static str> {
                let mut fields = Vec::new();
                #(#checks)*
                fields
            }
            pub fn has_changes(&self) -> bool {
                !self.changed_fields().is_empty()
            }
        }
    };

    TokenStream::from(expanded)
}

fn is_option(ty: &syn::Type) -> bool {
    let syn::Type::Path(type_path) = ty else {
        return false;
    };
    type_path.path.segments.last().is_some_and(|seg| seg.ident == "Option")
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
