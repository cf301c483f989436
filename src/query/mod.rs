//! Backend query language.
//!
//! A small document-database dialect: boolean [`Filter`] trees over dotted
//! field paths, [`Sort`] specs, include-only [`Projection`]s and aggregation
//! [`Stage`]s. Every type renders as its MongoDB JSON equivalent through
//! `Display`, which is what operation logs print.
//!
//! Field paths follow MongoDB rules: `a.b` traverses nested objects and, when
//! `a` is an array, every element of it. A filter on an array field matches
//! when any element matches.

pub(crate) mod eval;
mod pipeline;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use eval::Matcher;
pub use pipeline::{Accumulator, Expr, Pipeline, Stage};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Storage key assigned by the store on insert.
pub const ID_FIELD: &str = "_id";

/// Boolean test over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    Empty,
    /// Equality. `Eq(field, null)` also matches documents without the field.
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Regex {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    Exists(String, bool),
    /// Array field of exactly this length.
    Size(String, usize),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Regex {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    /// Case-insensitive regex.
    pub fn iregex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Regex {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Filter::Exists(field.into(), exists)
    }

    pub fn size(field: impl Into<String>, size: usize) -> Self {
        Filter::Size(field.into(), size)
    }

    /// Field missing, `null`, or an empty array.
    pub fn absent_or_empty(field: impl Into<String>) -> Self {
        let field = field.into();
        Filter::Or(vec![Filter::Eq(field.clone(), Value::Null), Filter::Size(field, 0)])
    }

    /// Conjunction. `Empty` clauses are dropped, a single clause is returned
    /// unwrapped and no clause at all yields `Empty`.
    pub fn and(clauses: impl IntoIterator<Item = Filter>) -> Self {
        let mut clauses: Vec<Filter> = clauses.into_iter().filter(|c| !c.is_empty()).collect();
        match clauses.len() {
            0 => Filter::Empty,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        }
    }

    /// Disjunction. An `Empty` clause matches everything and absorbs the others.
    pub fn or(clauses: impl IntoIterator<Item = Filter>) -> Self {
        let mut clauses: Vec<Filter> = clauses.into_iter().collect();
        if clauses.is_empty() || clauses.iter().any(Filter::is_empty) {
            return Filter::Empty;
        }
        if clauses.len() == 1 {
            return clauses.remove(0);
        }
        Filter::Or(clauses)
    }

    pub fn combine(clauses: impl IntoIterator<Item = Filter>, logical_and: bool) -> Self {
        if logical_and {
            Filter::and(clauses)
        } else {
            Filter::or(clauses)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }

    /// MongoDB JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::Empty => json!({}),
            Filter::Eq(field, value) => json!({ field: { "$eq": value } }),
            Filter::In(field, values) => json!({ field: { "$in": values } }),
            Filter::Gt(field, value) => json!({ field: { "$gt": value } }),
            Filter::Gte(field, value) => json!({ field: { "$gte": value } }),
            Filter::Lt(field, value) => json!({ field: { "$lt": value } }),
            Filter::Lte(field, value) => json!({ field: { "$lte": value } }),
            Filter::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                let options = if *case_insensitive { "i" } else { "" };
                json!({ field: { "$regex": pattern, "$options": options } })
            }
            Filter::Exists(field, exists) => json!({ field: { "$exists": exists } }),
            Filter::Size(field, size) => json!({ field: { "$size": size } }),
            Filter::And(clauses) => {
                json!({ "$and": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(clauses) => {
                json!({ "$or": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Empty
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_i32(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

/// One `(field, direction)` sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Ordered list of sort keys; the first key has the highest precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort(Vec<OrderBy>);

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.0.push(OrderBy::asc(field));
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.0.push(OrderBy::desc(field));
        self
    }

    pub fn keys(&self) -> &[OrderBy] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|o| o.field == field)
    }

    pub fn push(&mut self, order: OrderBy) {
        self.0.push(order);
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for order in &self.0 {
            map.insert(order.field.clone(), json!(order.direction.as_i32()));
        }
        Value::Object(map)
    }
}

impl From<Vec<OrderBy>> for Sort {
    fn from(keys: Vec<OrderBy>) -> Self {
        Sort(keys)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Include-only projection. `_id` is always kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn include<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Only the storage key; used for existence probes.
    pub fn id_only() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(ID_FIELD.to_string(), json!(1));
        for field in &self.fields {
            map.insert(field.clone(), json!(1));
        }
        Value::Object(map)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
