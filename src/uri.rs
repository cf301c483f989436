//! URIs - the externally stable identity of every persisted model.
//!
//! Identifiers may be written in compact `prefix:local` form or fully expanded.
//! [`Namespaces`] maps compact prefixes to base IRIs so that both spellings of
//! the same identifier compare equal once expanded.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DaoError;

/// A validated URI string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    /// Parse a URI. It must carry a scheme (or compact prefix) and contain no whitespace.
    pub fn parse(value: impl Into<String>) -> Result<Self, DaoError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DaoError::MalformedUri("empty uri".into()));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DaoError::MalformedUri(format!("{value:?} contains whitespace")));
        }
        let scheme = match value.split_once(':') {
            Some((scheme, rest)) if !rest.is_empty() => scheme,
            _ => {
                return Err(DaoError::MalformedUri(format!(
                    "{value:?} has no scheme or prefix"
                )))
            }
        };
        let valid_scheme = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'));
        if !valid_scheme {
            return Err(DaoError::MalformedUri(format!(
                "{value:?} has an invalid scheme"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uri {
    type Err = DaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

impl TryFrom<String> for Uri {
    type Error = DaoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Uri::parse(value)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.0
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Uri> for serde_json::Value {
    fn from(uri: Uri) -> Self {
        serde_json::Value::String(uri.0)
    }
}

impl From<&Uri> for serde_json::Value {
    fn from(uri: &Uri) -> Self {
        serde_json::Value::String(uri.0.clone())
    }
}

/// Compact prefix to base IRI mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespaces {
    prefixes: BTreeMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of a prefix.
    pub fn with(mut self, prefix: impl Into<String>, base: impl Into<String>) -> Self {
        self.insert(prefix, base);
        self
    }

    pub fn insert(&mut self, prefix: impl Into<String>, base: impl Into<String>) {
        self.prefixes.insert(prefix.into(), base.into());
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Expand a compact URI to its full form. Unknown prefixes and already
    /// expanded URIs are returned unchanged.
    pub fn expand(&self, uri: &Uri) -> Uri {
        if let Some((prefix, local)) = uri.as_str().split_once(':') {
            if !local.starts_with("//") {
                if let Some(base) = self.prefixes.get(prefix) {
                    return Uri(format!("{base}{local}"));
                }
            }
        }
        uri.clone()
    }

    pub fn expand_all<'a>(&self, uris: impl IntoIterator<Item = &'a Uri>) -> Vec<Uri> {
        uris.into_iter().map(|uri| self.expand(uri)).collect()
    }

    /// Compact a URI using the longest matching base IRI.
    pub fn compact(&self, uri: &Uri) -> Uri {
        let best = self
            .prefixes
            .iter()
            .filter(|(_, base)| uri.as_str().starts_with(base.as_str()))
            .max_by_key(|(_, base)| base.len());

        match best {
            Some((prefix, base)) if uri.as_str().len() > base.len() => {
                Uri(format!("{prefix}:{}", &uri.as_str()[base.len()..]))
            }
            _ => uri.clone(),
        }
    }
}

/// Values holding uris that are stored in expanded form.
pub trait ExpandUris {
    fn expand_uris(&mut self, namespaces: &Namespaces);
}

impl ExpandUris for Uri {
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        *self = namespaces.expand(self);
    }
}

impl<T: ExpandUris> ExpandUris for Option<T> {
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        if let Some(value) = self {
            value.expand_uris(namespaces);
        }
    }
}

impl<T: ExpandUris> ExpandUris for Vec<T> {
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        for value in self {
            value.expand_uris(namespaces);
        }
    }
}

/// Helpers for building URI candidates from a prefix, a readable segment and a retry counter.
pub mod generation {
    use super::Uri;
    use crate::error::DaoError;

    /// Lower-case the segment, turn whitespace into `_` and drop characters
    /// outside `[a-z0-9_.-]`.
    pub fn normalize_segment(segment: &str) -> String {
        segment
            .trim()
            .chars()
            .flat_map(char::to_lowercase)
            .filter_map(|c| match c {
                c if c.is_whitespace() => Some('_'),
                'a'..='z' | '0'..='9' | '_' | '.' | '-' => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Join a base URI and a collection path segment.
    pub fn collection_prefix(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_matches('/'))
    }

    /// `{prefix}/{segment}` for the first attempt, `{prefix}/{segment}-{retry}` after.
    pub fn candidate(prefix: &str, segment: &str, retry: u32) -> Result<Uri, DaoError> {
        let segment = normalize_segment(segment);
        if segment.is_empty() {
            return Err(DaoError::InvalidArgument(
                "uri segment is empty after normalization".into(),
            ));
        }
        let prefix = prefix.trim_end_matches('/');
        let uri = if retry == 0 {
            format!("{prefix}/{segment}")
        } else {
            format!("{prefix}/{segment}-{retry}")
        };
        Uri::parse(uri)
    }

    /// Candidate with a random v4 UUID segment.
    pub fn random(prefix: &str, retry: u32) -> Result<Uri, DaoError> {
        candidate(prefix, &uuid::Uuid::new_v4().simple().to_string(), retry)
    }
}
