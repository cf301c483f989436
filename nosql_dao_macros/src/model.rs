use proc_macro::TokenStream;
use proc_macro2::{Span, TokenTree};
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr};

struct StructAttrs {
    collection: String,
    uri_segment: Option<Ident>,
}

pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let attrs = extract_struct_attrs(input)?;
    let collection = &attrs.collection;

    let uri_field = extract_marked_field(input, "uri")?;
    let type_field = extract_marked_field(input, "rdf_type")?;

    let mut expanded = expandable_fields(input)?;
    for field in [&uri_field, &type_field] {
        if !expanded.contains(field) {
            expanded.push(field.clone());
        }
    }

    // Without a segment the trait's random default applies.
    let generate_uri = attrs.uri_segment.map(|segment| {
        let value = if has_field(input, &segment) {
            quote! { &self.#segment }
        } else {
            quote! { &self.#segment() }
        };
        quote! {
            fn generate_uri(
                &self,
                prefix: &str,
                retry: u32,
            ) -> ::core::result::Result<::nosql_dao::Uri, ::nosql_dao::DaoError> {
                let segment = #value;
                ::nosql_dao::uri::generation::candidate(
                    prefix,
                    ::core::convert::AsRef::<str>::as_ref(segment),
                    retry,
                )
            }
        }
    });

    Ok(quote! {
        impl ::nosql_dao::Model for #name {
            const COLLECTION: &'static str = #collection;

            fn uri(&self) -> ::core::option::Option<&::nosql_dao::Uri> {
                self.#uri_field.as_ref()
            }

            fn set_uri(&mut self, uri: ::nosql_dao::Uri) {
                self.#uri_field = ::core::option::Option::Some(uri);
            }

            fn rdf_type(&self) -> ::core::option::Option<&::nosql_dao::Uri> {
                self.#type_field.as_ref()
            }

            fn set_rdf_type(&mut self, rdf_type: ::nosql_dao::Uri) {
                self.#type_field = ::core::option::Option::Some(rdf_type);
            }

            fn expand_uris(&mut self, namespaces: &::nosql_dao::Namespaces) {
                #(
                    ::nosql_dao::uri::ExpandUris::expand_uris(&mut self.#expanded, namespaces);
                )*
            }

            #generate_uri
        }
    })
}

fn extract_struct_attrs(input: &DeriveInput) -> syn::Result<StructAttrs> {
    let mut collection = None;
    let mut uri_segment = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                collection = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("uri_segment") {
                let value: LitStr = meta.value()?.parse()?;
                uri_segment = Some(Ident::new(&value.value(), value.span()));
                Ok(())
            } else {
                Err(meta.error("expected `collection` or `uri_segment`"))
            }
        })?;
    }

    // Default: snake_case struct name + "s"
    let collection =
        collection.unwrap_or_else(|| format!("{}s", to_snake_case(&input.ident.to_string())));

    Ok(StructAttrs {
        collection,
        uri_segment,
    })
}

/// Finds the field marked `#[model(<marker>)]`, falling back to a field named `<marker>`.
fn extract_marked_field(input: &DeriveInput, marker: &str) -> syn::Result<Ident> {
    let fields = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "Model derive: only structs with named fields are supported",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Model derive: only structs are supported",
            ))
        }
    };

    for field in fields {
        for attr in &field.attrs {
            if !attr.path().is_ident("model") {
                continue;
            }
            let mut marked = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(marker) {
                    marked = true;
                }
                Ok(())
            })?;
            if marked {
                if let Some(ident) = &field.ident {
                    return Ok(ident.clone());
                }
            }
        }
    }

    for field in fields {
        if let Some(ident) = &field.ident {
            if ident == marker {
                return Ok(ident.clone());
            }
        }
    }

    Err(syn::Error::new(
        Span::call_site(),
        format!(
            "Model derive: no field marked with #[model({marker})] and no field named `{marker}`"
        ),
    ))
}

/// Fields whose type mentions `Uri`, plus fields marked `#[model(expand)]`.
fn expandable_fields(input: &DeriveInput) -> syn::Result<Vec<Ident>> {
    let Data::Struct(data) = &input.data else {
        return Ok(Vec::new());
    };

    let mut expanded = Vec::new();
    for field in &data.fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let mut marked = false;
        for attr in &field.attrs {
            if !attr.path().is_ident("model") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("expand") {
                    marked = true;
                }
                Ok(())
            })?;
        }
        let ty = &field.ty;
        if marked || mentions_uri(quote!(#ty)) {
            expanded.push(ident.clone());
        }
    }
    Ok(expanded)
}

fn mentions_uri(tokens: proc_macro2::TokenStream) -> bool {
    tokens.into_iter().any(|tree| match tree {
        TokenTree::Ident(ident) => ident == "Uri",
        TokenTree::Group(group) => mentions_uri(group.stream()),
        _ => false,
    })
}

fn has_field(input: &DeriveInput, name: &Ident) -> bool {
    match &input.data {
        Data::Struct(data) => data
            .fields
            .iter()
            .any(|field| field.ident.as_ref() == Some(name)),
        _ => false,
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
