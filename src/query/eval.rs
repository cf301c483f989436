//! In-process evaluation of the query language, used by the in-memory store.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Number, Value};

use super::{Accumulator, Direction, Expr, Filter, Pipeline, Projection, Sort, Stage, ID_FIELD};
use crate::error::StoreError;

/// A [`Filter`] compiled for repeated evaluation.
#[derive(Debug)]
pub struct Matcher(Node);

#[derive(Debug)]
enum Node {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Cmp {
        field: String,
        value: Value,
        accept: fn(Ordering) -> bool,
    },
    Regex(String, Regex),
    Exists(String, bool),
    Size(String, usize),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Matcher {
    /// Compile a filter. Fails on an invalid regular expression.
    pub fn new(filter: &Filter) -> Result<Self, StoreError> {
        Ok(Matcher(compile(filter)?))
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.0.matches(doc)
    }
}

fn compile(filter: &Filter) -> Result<Node, StoreError> {
    let node = match filter {
        Filter::Empty => Node::All,
        Filter::Eq(field, value) => Node::Eq(field.clone(), value.clone()),
        Filter::In(field, values) => Node::In(field.clone(), values.clone()),
        Filter::Gt(field, value) => cmp(field, value, |o| o == Ordering::Greater),
        Filter::Gte(field, value) => cmp(field, value, |o| o != Ordering::Less),
        Filter::Lt(field, value) => cmp(field, value, |o| o == Ordering::Less),
        Filter::Lte(field, value) => cmp(field, value, |o| o != Ordering::Greater),
        Filter::Regex {
            field,
            pattern,
            case_insensitive,
        } => {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(*case_insensitive)
                .build()
                .map_err(|e| StoreError::InvalidQuery(format!("invalid regex {pattern:?}: {e}")))?;
            Node::Regex(field.clone(), regex)
        }
        Filter::Exists(field, exists) => Node::Exists(field.clone(), *exists),
        Filter::Size(field, size) => Node::Size(field.clone(), *size),
        Filter::And(clauses) => Node::And(clauses.iter().map(compile).collect::<Result<_, _>>()?),
        Filter::Or(clauses) => Node::Or(clauses.iter().map(compile).collect::<Result<_, _>>()?),
    };
    Ok(node)
}

fn cmp(field: &str, value: &Value, accept: fn(Ordering) -> bool) -> Node {
    Node::Cmp {
        field: field.to_string(),
        value: value.clone(),
        accept,
    }
}

impl Node {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Node::All => true,
            Node::Eq(field, expected) => eq_matches(&resolve(doc, field), expected),
            Node::In(field, values) => {
                let candidates = resolve(doc, field);
                values.iter().any(|v| eq_matches(&candidates, v))
            }
            Node::Cmp {
                field,
                value,
                accept,
            } => flatten(&resolve(doc, field))
                .into_iter()
                .filter(|c| type_rank(c) == type_rank(value))
                .any(|c| accept(compare(c, value))),
            Node::Regex(field, regex) => flatten(&resolve(doc, field))
                .into_iter()
                .any(|c| c.as_str().is_some_and(|s| regex.is_match(s))),
            Node::Exists(field, exists) => resolve(doc, field).is_empty() != *exists,
            Node::Size(field, size) => resolve(doc, field)
                .into_iter()
                .any(|c| matches!(c, Value::Array(items) if items.len() == *size)),
            Node::And(nodes) => nodes.iter().all(|n| n.matches(doc)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(doc)),
        }
    }
}

fn eq_matches(candidates: &[&Value], expected: &Value) -> bool {
    if expected.is_null() {
        return candidates.is_empty() || candidates.iter().any(|c| c.is_null());
    }
    candidates.iter().any(|c| {
        values_equal(c, expected)
            || matches!(c, Value::Array(items) if items.iter().any(|i| values_equal(i, expected)))
    })
}

/// All values reachable at a dotted path, traversing arrays of sub-documents.
pub(crate) fn resolve<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect(next, rest, out);
                }
            }
            for item in items.iter().filter(|i| i.is_object()) {
                collect(item, segments, out);
            }
        }
        _ => {}
    }
}

fn flatten<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for candidate in candidates {
        match candidate {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(*other),
        }
    }
    out
}

/// Value of an expression path; paths crossing arrays yield the array of reached values.
pub(crate) fn field_value(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        match current {
            Value::Object(map) => current = map.get(*segment)?,
            Value::Array(_) => {
                let mut out = Vec::new();
                collect(current, &segments[i..], &mut out);
                return Some(Value::Array(out.into_iter().cloned().collect()));
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order across JSON values: by type first, then by value.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (x.as_i64(), y.as_i64()) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => {
            let l = x.as_f64().unwrap_or(f64::NAN);
            let r = y.as_f64().unwrap_or(f64::NAN);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare(a, b) == Ordering::Equal
}

fn sort_key(doc: &Value, field: &str, direction: Direction) -> Value {
    let candidates = flatten(&resolve(doc, field));
    let chosen = match direction {
        Direction::Asc => candidates.into_iter().min_by(|a, b| compare(a, b)),
        Direction::Desc => candidates.into_iter().max_by(|a, b| compare(a, b)),
    };
    chosen.cloned().unwrap_or(Value::Null)
}

pub(crate) fn compare_documents(a: &Value, b: &Value, sort: &Sort) -> Ordering {
    for key in sort.keys() {
        let ord = compare(
            &sort_key(a, &key.field, key.direction),
            &sort_key(b, &key.field, key.direction),
        );
        let ord = match key.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort.
pub(crate) fn sort_documents(docs: &mut [Value], sort: &Sort) {
    if !sort.is_empty() {
        docs.sort_by(|a, b| compare_documents(a, b, sort));
    }
}

pub(crate) fn project(doc: &Value, projection: &Projection) -> Value {
    let mut out = Map::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in projection.fields() {
        if let Some(value) = get_path(doc, field) {
            set_path(&mut out, field, value.clone());
        }
    }
    Value::Object(out)
}

/// Distinct values at a path, arrays flattened, nulls dropped, first-seen order.
pub(crate) fn distinct_values<'a>(docs: impl IntoIterator<Item = &'a Value>, field: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for doc in docs {
        for value in flatten(&resolve(doc, field)) {
            if !value.is_null() && !out.iter().any(|v| values_equal(v, value)) {
                out.push(value.clone());
            }
        }
    }
    out
}

fn eval_expr(doc: &Value, expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Root => Some(doc.clone()),
        Expr::Field(path) => field_value(doc, path),
        Expr::Const(value) => Some(value.clone()),
    }
}

fn add_numbers(total: &Value, value: &Value) -> Value {
    match (total, value) {
        (Value::Number(t), Value::Number(v)) => match (t.as_i64(), v.as_i64()) {
            (Some(l), Some(r)) => Value::from(l.saturating_add(r)),
            _ => Value::from(t.as_f64().unwrap_or(0.0) + v.as_f64().unwrap_or(0.0)),
        },
        _ => total.clone(),
    }
}

fn group(
    docs: Vec<Value>,
    id: Option<&Expr>,
    accumulators: &[(String, Accumulator)],
) -> Vec<Value> {
    let mut groups: Vec<(Value, Map<String, Value>)> = Vec::new();

    for doc in &docs {
        let key = id
            .and_then(|expr| eval_expr(doc, expr))
            .unwrap_or(Value::Null);
        let position = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(position) => position,
            None => {
                let mut state = Map::new();
                for (name, acc) in accumulators {
                    let initial = match acc {
                        Accumulator::First(_) => continue,
                        Accumulator::AddToSet(_) | Accumulator::Push(_) => Value::Array(Vec::new()),
                        Accumulator::Sum(_) => Value::from(0),
                    };
                    state.insert(name.clone(), initial);
                }
                groups.push((key, state));
                groups.len() - 1
            }
        };

        let state = &mut groups[position].1;
        for (name, acc) in accumulators {
            match acc {
                Accumulator::First(expr) => {
                    if !state.contains_key(name) {
                        state.insert(name.clone(), eval_expr(doc, expr).unwrap_or(Value::Null));
                    }
                }
                Accumulator::AddToSet(expr) | Accumulator::Push(expr) => {
                    let unique = matches!(acc, Accumulator::AddToSet(_));
                    if let (Some(value), Some(Value::Array(items))) =
                        (eval_expr(doc, expr), state.get_mut(name))
                    {
                        if !unique || !items.iter().any(|i| values_equal(i, &value)) {
                            items.push(value);
                        }
                    }
                }
                Accumulator::Sum(expr) => {
                    if let (Some(value), Some(total)) = (eval_expr(doc, expr), state.get_mut(name)) {
                        *total = add_numbers(total, &value);
                    }
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, state)| {
            let mut out = Map::new();
            out.insert(ID_FIELD.to_string(), key);
            out.extend(state);
            Value::Object(out)
        })
        .collect()
}

fn unwind(docs: Vec<Value>, path: &str) -> Vec<Value> {
    let path = path.trim_start_matches('$');
    let mut out = Vec::new();
    for doc in docs {
        let items = match get_path(&doc, path) {
            Some(Value::Array(items)) => Some(items.clone()),
            None | Some(Value::Null) => continue,
            Some(_) => None,
        };
        let Some(items) = items else {
            out.push(doc);
            continue;
        };
        for item in items {
            let mut copy = doc.clone();
            if let Value::Object(map) = &mut copy {
                set_path(map, path, item);
            }
            out.push(copy);
        }
    }
    out
}

/// Run a pipeline over `docs`. `foreign` loads the documents of a `$lookup` collection.
pub(crate) fn run_pipeline(
    mut docs: Vec<Value>,
    pipeline: &Pipeline,
    foreign: &dyn Fn(&str) -> Result<Vec<Value>, StoreError>,
) -> Result<Vec<Value>, StoreError> {
    for stage in pipeline.stages() {
        docs = match stage {
            Stage::Match(filter) => {
                let matcher = Matcher::new(filter)?;
                docs.into_iter().filter(|d| matcher.matches(d)).collect()
            }
            Stage::Project(projection) => docs.iter().map(|d| project(d, projection)).collect(),
            Stage::Group { id, accumulators } => group(docs, id.as_ref(), accumulators),
            Stage::Sort(sort) => {
                sort_documents(&mut docs, sort);
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(to_usize(*n)).collect(),
            Stage::Limit(n) => docs.into_iter().take(to_usize(*n)).collect(),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let others = foreign(from)?;
                docs.into_iter()
                    .map(|mut doc| {
                        let locals = flatten(&resolve(&doc, local_field))
                            .into_iter()
                            .cloned()
                            .collect::<Vec<_>>();
                        let joined: Vec<Value> = others
                            .iter()
                            .filter(|other| {
                                let keys = resolve(other, foreign_field);
                                locals.iter().any(|l| eq_matches(&keys, l))
                            })
                            .cloned()
                            .collect();
                        if let Value::Object(map) = &mut doc {
                            set_path(map, as_field, Value::Array(joined));
                        }
                        doc
                    })
                    .collect()
            }
            Stage::Unwind(path) => unwind(docs, path),
            Stage::ReplaceRoot(expr) => docs
                .iter()
                .map(|doc| match eval_expr(doc, expr) {
                    Some(root @ Value::Object(_)) => Ok(root),
                    other => Err(StoreError::InvalidQuery(format!(
                        "$replaceRoot expects a document, got {}",
                        other.unwrap_or(Value::Null)
                    ))),
                })
                .collect::<Result<_, _>>()?,
        };
    }
    Ok(docs)
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
