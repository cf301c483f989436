mod model;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Model)] derive macro
// ============================================================================

/// Derive macro for the `Model` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Model)]
/// #[model(collection = "devices", uri_segment = "slug")]
/// struct Device {
///     pub uri: Option<Uri>,
///     pub rdf_type: Option<Uri>,
///     pub name: String,
/// }
///
/// impl Device {
///     fn slug(&self) -> String {
///         self.name.clone()
///     }
/// }
/// ```
///
/// - `#[model(collection = "...")]` sets the collection name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[model(uri_segment = "...")]` names a field, or a `&self` method, whose
///   value (anything `AsRef<str>`) becomes the readable part of generated URIs.
///   If omitted, generated URIs use a random segment.
/// - `#[model(uri)]` / `#[model(rdf_type)]` mark the identifier and type fields
///   (both `Option<Uri>`). If omitted, fields named `uri` and `rdf_type` are used.
///   The fields are stored under the keys `uri` and `rdf_type`, so a renamed
///   field needs a matching `#[serde(rename = "...")]`.
/// - Fields whose type mentions `Uri` are expanded against the configured
///   namespaces before writes. `#[model(expand)]` opts in any other field
///   whose type implements `ExpandUris`.
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    model::derive_model(input)
}
