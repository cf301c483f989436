//! Search filters and their compilation into backend queries.
//!
//! A [`SearchFilter`] is an immutable value built with [`SearchFilterBuilder`].
//! It holds a list of [`Criterion`]s, the AND/OR flag combining them,
//! pagination and ordering. A [`FilterBuilder`] turns a filter into clauses:
//!
//! - zero clauses compile to [`Filter::Empty`] (match everything),
//! - a single clause compiles to itself, unwrapped,
//! - otherwise the clauses are joined with `$and` or `$or`.
//!
//! Constraints returned by [`FilterBuilder::constraints`] (access control) are
//! always AND-ed with the result, whatever the flag says.

use serde_json::Value;

use crate::error::DaoError;
use crate::model::{TYPE_FIELD, URI_FIELD};
use crate::query::{Filter, OrderBy, Sort};
use crate::uri::{Namespaces, Uri};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// One optional search criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Exact uri.
    Uri(Uri),
    /// Uri within the set.
    IncludedUris(Vec<Uri>),
    /// Type within the set.
    RdfTypes(Vec<Uri>),
    /// Field value within the set.
    In { field: String, values: Vec<Value> },
    /// Inclusive bounds; an absent bound is open.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    Regex {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    Equals { field: String, value: Value },
}

impl Criterion {
    /// Clause for this criterion; `None` when it carries nothing to test.
    /// Uris are expanded with `namespaces` first.
    pub fn to_filter(&self, namespaces: &Namespaces) -> Option<Filter> {
        match self {
            Criterion::Uri(uri) => Some(Filter::eq(URI_FIELD, namespaces.expand(uri))),
            Criterion::IncludedUris(uris) => uri_set(URI_FIELD, uris, namespaces),
            Criterion::RdfTypes(types) => uri_set(TYPE_FIELD, types, namespaces),
            Criterion::In { field, values } if !values.is_empty() => {
                Some(Filter::In(field.clone(), values.clone()))
            }
            Criterion::In { .. } => None,
            Criterion::Range { field, min, max } => {
                let bounds = min
                    .iter()
                    .map(|v| Filter::Gte(field.clone(), v.clone()))
                    .chain(max.iter().map(|v| Filter::Lte(field.clone(), v.clone())));
                let filter = Filter::and(bounds);
                (!filter.is_empty()).then_some(filter)
            }
            Criterion::Regex { pattern, .. } if pattern.is_empty() => None,
            Criterion::Regex {
                field,
                pattern,
                case_insensitive,
            } => Some(Filter::Regex {
                field: field.clone(),
                pattern: pattern.clone(),
                case_insensitive: *case_insensitive,
            }),
            Criterion::Equals { field, value } => Some(Filter::Eq(field.clone(), value.clone())),
        }
    }
}

fn uri_set(field: &str, uris: &[Uri], namespaces: &Namespaces) -> Option<Filter> {
    if uris.is_empty() {
        return None;
    }
    Some(Filter::is_in(field, namespaces.expand_all(uris)))
}

/// Immutable search filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    criteria: Vec<Criterion>,
    logical_and: bool,
    page: u64,
    page_size: u64,
    order_by: Sort,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            logical_and: true,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: Sort::new(),
        }
    }
}

impl SearchFilter {
    pub fn builder() -> SearchFilterBuilder {
        SearchFilterBuilder::default()
    }

    /// Filter matching every document, default pagination.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn to_builder(&self) -> SearchFilterBuilder {
        SearchFilterBuilder {
            inner: self.clone(),
        }
    }

    /// Same filter, another page.
    pub fn with_page(&self, page: u64) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn logical_and(&self) -> bool {
        self.logical_and
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn order_by(&self) -> &Sort {
        &self.order_by
    }

    /// Number of documents skipped before this page.
    pub fn skip(&self) -> Result<u64, DaoError> {
        self.page.checked_mul(self.page_size).ok_or_else(|| {
            DaoError::InvalidArgument(format!(
                "page {} with page size {} overflows",
                self.page, self.page_size
            ))
        })
    }

    /// Page size must be in `1..=max_page_size` and the skip must not overflow.
    pub fn validate_pagination(&self, max_page_size: u64) -> Result<(), DaoError> {
        if self.page_size == 0 {
            return Err(DaoError::InvalidArgument(
                "page size must be greater than 0".into(),
            ));
        }
        if self.page_size > max_page_size {
            return Err(DaoError::InvalidArgument(format!(
                "page size {} exceeds the maximum of {max_page_size}",
                self.page_size
            )));
        }
        self.skip().map(|_| ())
    }

    pub fn clauses(&self, namespaces: &Namespaces) -> Vec<Filter> {
        self.criteria
            .iter()
            .filter_map(|c| c.to_filter(namespaces))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilterBuilder {
    inner: SearchFilter,
}

impl SearchFilterBuilder {
    pub fn uri(self, uri: Uri) -> Self {
        self.criterion(Criterion::Uri(uri))
    }

    pub fn include_uris(self, uris: impl IntoIterator<Item = Uri>) -> Self {
        self.criterion(Criterion::IncludedUris(uris.into_iter().collect()))
    }

    pub fn rdf_types(self, types: impl IntoIterator<Item = Uri>) -> Self {
        self.criterion(Criterion::RdfTypes(types.into_iter().collect()))
    }

    pub fn any_of<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.criterion(Criterion::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn range(
        self,
        field: impl Into<String>,
        min: Option<impl Into<Value>>,
        max: Option<impl Into<Value>>,
    ) -> Self {
        self.criterion(Criterion::Range {
            field: field.into(),
            min: min.map(Into::into),
            max: max.map(Into::into),
        })
    }

    pub fn regex(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.criterion(Criterion::Regex {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive: false,
        })
    }

    pub fn iregex(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.criterion(Criterion::Regex {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive: true,
        })
    }

    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criterion(Criterion::Equals {
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn criterion(mut self, criterion: Criterion) -> Self {
        self.inner.criteria.push(criterion);
        self
    }

    pub fn logical_and(mut self, logical_and: bool) -> Self {
        self.inner.logical_and = logical_and;
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.inner.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.inner.page_size = page_size;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.inner.order_by.push(order);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.inner.order_by = sort;
        self
    }

    pub fn build(self) -> SearchFilter {
        self.inner
    }
}

/// Filters accepted by the generic DAO.
pub trait DaoFilter: Clone + Send + Sync {
    fn search(&self) -> &SearchFilter;
}

impl DaoFilter for SearchFilter {
    fn search(&self) -> &SearchFilter {
        self
    }
}

/// Compiles a DAO filter into backend clauses.
pub trait FilterBuilder<F>: Send + Sync {
    /// One clause per present criterion, combined according to the filter's AND/OR flag.
    fn clauses(&self, filter: &F) -> Result<Vec<Filter>, DaoError>;

    /// Clauses always AND-ed with the combined criteria.
    fn constraints(&self, _filter: &F) -> Result<Vec<Filter>, DaoError> {
        Ok(Vec::new())
    }

    fn compile(&self, filter: &F) -> Result<Filter, DaoError>
    where
        F: DaoFilter,
    {
        let criteria = Filter::combine(self.clauses(filter)?, filter.search().logical_and());
        let constraints = self.constraints(filter)?;
        Ok(Filter::and(std::iter::once(criteria).chain(constraints)))
    }
}

/// Builder for the generic criteria of a [`SearchFilter`].
#[derive(Debug, Clone, Default)]
pub struct CriteriaFilterBuilder {
    namespaces: Namespaces,
}

impl CriteriaFilterBuilder {
    pub fn new(namespaces: Namespaces) -> Self {
        Self { namespaces }
    }
}

impl<F: DaoFilter> FilterBuilder<F> for CriteriaFilterBuilder {
    fn clauses(&self, filter: &F) -> Result<Vec<Filter>, DaoError> {
        Ok(filter.search().clauses(&self.namespaces))
    }
}
