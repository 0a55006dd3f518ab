//! Caller filters and compiled clauses.
//!
//! `Filter` is what call sites hand in; `Clause` is what the compiler emits.
//! A `Clause` is a superset of `Filter` carrying the two shapes only the
//! compiler produces: null-or-false soft-delete exclusion and the combinable
//! geographic disjunction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn inclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Equals {
        column: String,
        value: Value,
    },
    /// Scalar column value is a member of `values`.
    In {
        column: String,
        values: Vec<Value>,
    },
    Range {
        column: String,
        lower: Option<RangeBound>,
        upper: Option<RangeBound>,
    },
    /// Array column shares at least one element with `values`.
    Overlaps {
        column: String,
        values: Vec<Value>,
    },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn overlaps<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::Overlaps {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Range {
            column: column.into(),
            lower: Some(RangeBound::inclusive(value)),
            upper: None,
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Range {
            column: column.into(),
            lower: Some(RangeBound::exclusive(value)),
            upper: None,
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Range {
            column: column.into(),
            lower: None,
            upper: Some(RangeBound::inclusive(value)),
        }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Range {
            column: column.into(),
            lower: None,
            upper: Some(RangeBound::exclusive(value)),
        }
    }

    /// Inclusive on both ends.
    pub fn between(
        column: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Self {
        Filter::Range {
            column: column.into(),
            lower: Some(RangeBound::inclusive(from)),
            upper: Some(RangeBound::inclusive(to)),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Equals { column, .. }
            | Filter::In { column, .. }
            | Filter::Range { column, .. }
            | Filter::Overlaps { column, .. } => column,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals { column, value } => write!(f, "{column} = {value}"),
            Filter::In { column, values } => write!(f, "{column} in ({})", join(values)),
            Filter::Overlaps { column, values } => {
                write!(f, "{column} overlaps ({})", join(values))
            }
            Filter::Range {
                column,
                lower,
                upper,
            } => {
                let mut parts = Vec::new();
                if let Some(b) = lower {
                    let op = if b.inclusive { ">=" } else { ">" };
                    parts.push(format!("{column} {op} {}", b.value));
                }
                if let Some(b) = upper {
                    let op = if b.inclusive { "<=" } else { "<" };
                    parts.push(format!("{column} {op} {}", b.value));
                }
                if parts.is_empty() {
                    write!(f, "{column} unbounded")
                } else {
                    write!(f, "{}", parts.join(" and "))
                }
            }
        }
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", rename_all = "snake_case")]
pub enum Clause {
    Filter(Filter),
    /// Column is null or false.
    NotTrue { column: String },
    /// At least one nested clause holds. Empty means nothing matches.
    AnyOf { clauses: Vec<Clause> },
}

impl Clause {
    /// Every column this clause references, in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Clause::Filter(f) => vec![f.column()],
            Clause::NotTrue { column } => vec![column.as_str()],
            Clause::AnyOf { clauses } => clauses.iter().flat_map(Clause::columns).collect(),
        }
    }
}

impl From<Filter> for Clause {
    fn from(f: Filter) -> Self {
        Clause::Filter(f)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Filter(inner) => write!(f, "{inner}"),
            Clause::NotTrue { column } => write!(f, "{column} is not true"),
            Clause::AnyOf { clauses } => {
                let parts: Vec<String> = clauses.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(" or "))
            }
        }
    }
}

/// Human-readable rendering of a clause list, used in `QueryFailed`.
pub fn describe(clauses: &[Clause]) -> Vec<String> {
    clauses.iter().map(ToString::to_string).collect()
}
