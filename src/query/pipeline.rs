use std::fmt;

use serde_json::{json, Map, Value};

use super::{Filter, Projection, Sort};

/// Value expression used by `$group` and `$replaceRoot`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `$$ROOT`, the whole current document.
    Root,
    /// `$path`.
    Field(String),
    Const(Value),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expr::Root => json!("$$ROOT"),
            Expr::Field(path) => json!(format!("${path}")),
            Expr::Const(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    First(Expr),
    AddToSet(Expr),
    Push(Expr),
    Sum(Expr),
}

impl Accumulator {
    fn to_json(&self) -> Value {
        match self {
            Accumulator::First(expr) => json!({ "$first": expr.to_json() }),
            Accumulator::AddToSet(expr) => json!({ "$addToSet": expr.to_json() }),
            Accumulator::Push(expr) => json!({ "$push": expr.to_json() }),
            Accumulator::Sum(expr) => json!({ "$sum": expr.to_json() }),
        }
    }
}

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project(Projection),
    /// Group by `id` (`None` groups every document together).
    Group {
        id: Option<Expr>,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Sort),
    Skip(u64),
    Limit(u64),
    /// Left outer join on `local_field == foreign_field`, stored as an array under `as_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// One output document per element of the array at this path.
    Unwind(String),
    ReplaceRoot(Expr),
}

impl Stage {
    pub fn group_by(id: Expr) -> Self {
        Stage::Group {
            id: Some(id),
            accumulators: Vec::new(),
        }
    }

    /// Add an accumulator to a `Group` stage; other stages are returned unchanged.
    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        if let Stage::Group { accumulators, .. } = &mut self {
            accumulators.push((name.into(), accumulator));
        }
        self
    }

    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(filter) => json!({ "$match": filter.to_json() }),
            Stage::Project(projection) => json!({ "$project": projection.to_json() }),
            Stage::Group { id, accumulators } => {
                let mut group = Map::new();
                group.insert(
                    "_id".into(),
                    id.as_ref().map(Expr::to_json).unwrap_or(Value::Null),
                );
                for (name, acc) in accumulators {
                    group.insert(name.clone(), acc.to_json());
                }
                json!({ "$group": group })
            }
            Stage::Sort(sort) => json!({ "$sort": sort.to_json() }),
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => json!({
                "$lookup": {
                    "from": from,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": as_field,
                }
            }),
            Stage::Unwind(path) => json!({ "$unwind": format!("${path}") }),
            Stage::ReplaceRoot(expr) => json!({ "$replaceRoot": { "newRoot": expr.to_json() } }),
        }
    }
}

/// Ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline(Vec<Stage>);

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.0.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.0.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Pipeline(stages)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<Value> = self.0.iter().map(Stage::to_json).collect();
        write!(f, "{}", Value::Array(stages))
    }
}
