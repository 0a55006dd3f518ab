//! Renders `SelectRequest`s into parameterised Postgres SQL.
//!
//! Identifiers are validated by the core before compilation and are quoted
//! here; every value goes through `push_bind`.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use visibility_core::error::StoreError;
use visibility_core::filter::{Clause, Filter, RangeBound};
use visibility_core::store::SelectRequest;
use visibility_core::types::{SortDirection, Value};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table(schema: Option<&str>, collection: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", quote_ident(s), quote_ident(collection)),
        None => quote_ident(collection),
    }
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `SELECT <json row> FROM tbl t WHERE … ORDER BY t.… LIMIT … OFFSET …`
///
/// Ordering and window sit on the outermost select. A projection renders as
/// `jsonb_build_object`, so sort columns need not be among the fields.
pub fn select_rows<'a>(
    schema: Option<&str>,
    request: &SelectRequest,
) -> Result<QueryBuilder<'a, Postgres>, StoreError> {
    let row = if request.fields.is_empty() || request.fields.iter().any(|f| f == "*") {
        "to_jsonb(t)".to_string()
    } else {
        let pairs = request
            .fields
            .iter()
            .map(|f| format!("{}, t.{}", string_literal(f), quote_ident(f)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("jsonb_build_object({pairs})")
    };

    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(row);
    qb.push(" FROM ");
    qb.push(table(schema, &request.collection));
    qb.push(" t");
    push_where(&mut qb, &request.clauses)?;

    if !request.sort.is_empty() {
        let order = request
            .sort
            .iter()
            .map(|s| {
                let dir = match s.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("t.{} {dir}", quote_ident(&s.column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        qb.push(" ORDER BY ");
        qb.push(order);
    }
    if let Some(window) = request.window {
        qb.push(" LIMIT ");
        qb.push_bind(window.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(window.offset as i64);
    }
    Ok(qb)
}

/// `SELECT COUNT(*) FROM … WHERE …`, ignoring sort and window.
pub fn count_rows<'a>(
    schema: Option<&str>,
    request: &SelectRequest,
) -> Result<QueryBuilder<'a, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
    qb.push(table(schema, &request.collection));
    push_where(&mut qb, &request.clauses)?;
    Ok(qb)
}

pub fn push_where(qb: &mut QueryBuilder<'_, Postgres>, clauses: &[Clause]) -> Result<(), StoreError> {
    if clauses.is_empty() {
        return Ok(());
    }
    qb.push(" WHERE ");
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_clause(qb, clause)?;
    }
    Ok(())
}

pub fn push_clause(qb: &mut QueryBuilder<'_, Postgres>, clause: &Clause) -> Result<(), StoreError> {
    match clause {
        Clause::Filter(filter) => push_filter(qb, filter),
        Clause::NotTrue { column } => {
            qb.push(quote_ident(column));
            qb.push(" IS NOT TRUE");
            Ok(())
        }
        Clause::AnyOf { clauses } if clauses.is_empty() => {
            qb.push("FALSE");
            Ok(())
        }
        Clause::AnyOf { clauses } => {
            qb.push("(");
            for (i, nested) in clauses.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_clause(qb, nested)?;
            }
            qb.push(")");
            Ok(())
        }
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) -> Result<(), StoreError> {
    match filter {
        Filter::Equals {
            column,
            value: Value::Null,
        } => {
            qb.push(quote_ident(column));
            qb.push(" IS NULL");
        }
        Filter::Equals { column, value } => {
            push_column(qb, column, value);
            qb.push(" = ");
            push_value(qb, value);
        }
        Filter::In { values, .. } if values.is_empty() => {
            qb.push("FALSE");
        }
        Filter::In { column, values } => {
            let array = ValueArray::from_values(column, values)?;
            push_column(qb, column, &values[0]);
            qb.push(" = ANY(");
            array.push_bind(qb);
            qb.push(")");
        }
        Filter::Overlaps { values, .. } if values.is_empty() => {
            qb.push("FALSE");
        }
        Filter::Overlaps { column, values } => {
            let array = ValueArray::from_values(column, values)?;
            qb.push(quote_ident(column));
            qb.push(" && ");
            array.push_bind(qb);
        }
        Filter::Range {
            column,
            lower,
            upper,
        } => {
            let bounds: Vec<(&RangeBound, &str)> = [
                lower.as_ref().map(|b| (b, if b.inclusive { " >= " } else { " > " })),
                upper.as_ref().map(|b| (b, if b.inclusive { " <= " } else { " < " })),
            ]
            .into_iter()
            .flatten()
            .collect();
            if bounds.is_empty() {
                qb.push("TRUE");
            }
            for (i, (bound, op)) in bounds.into_iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_column(qb, column, &bound.value);
                qb.push(op);
                push_value(qb, &bound.value);
            }
        }
    }
    Ok(())
}

/// Text comparisons cast the column so enum-typed columns compare against
/// text parameters.
fn push_column(qb: &mut QueryBuilder<'_, Postgres>, column: &str, value: &Value) {
    qb.push(quote_ident(column));
    if matches!(value, Value::Text(_)) {
        qb.push("::text");
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        Value::Int(i) => {
            qb.push_bind(*i);
        }
        Value::Float(f) => {
            qb.push_bind(*f);
        }
        Value::Text(s) => {
            qb.push_bind(s.clone());
        }
        Value::Uuid(u) => {
            qb.push_bind(*u);
        }
        Value::Timestamp(t) => {
            qb.push_bind(*t);
        }
    }
}

/// Homogeneous array parameter for `= ANY(…)` and `&&`.
#[derive(Debug, Clone, PartialEq)]
enum ValueArray {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
    Uuid(Vec<Uuid>),
    Timestamp(Vec<DateTime<Utc>>),
}

impl ValueArray {
    fn from_values(column: &str, values: &[Value]) -> Result<Self, StoreError> {
        let mixed = || StoreError::Unsupported(format!("mixed or null values in array filter on '{column}'"));
        macro_rules! collect {
            ($variant:ident) => {
                values
                    .iter()
                    .map(|v| match v {
                        Value::$variant(x) => Ok(x.clone()),
                        _ => Err(mixed()),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(ValueArray::$variant)
            };
        }
        match values.first() {
            Some(Value::Bool(_)) => collect!(Bool),
            Some(Value::Int(_)) => collect!(Int),
            Some(Value::Float(_)) => collect!(Float),
            Some(Value::Text(_)) => collect!(Text),
            Some(Value::Uuid(_)) => collect!(Uuid),
            Some(Value::Timestamp(_)) => collect!(Timestamp),
            Some(Value::Null) | None => Err(mixed()),
        }
    }

    fn push_bind(self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            ValueArray::Bool(v) => qb.push_bind(v),
            ValueArray::Int(v) => qb.push_bind(v),
            ValueArray::Float(v) => qb.push_bind(v),
            ValueArray::Text(v) => qb.push_bind(v),
            ValueArray::Uuid(v) => qb.push_bind(v),
            ValueArray::Timestamp(v) => qb.push_bind(v),
        };
    }
}
