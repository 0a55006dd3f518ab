//! Value, row, sort and pagination types shared by every layer.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fetched row. Field selections are arbitrary, so rows stay JSON objects.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Typed filter operand. The compiler and adapters match on the variant,
/// never on the runtime shape of a JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Timestamp(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }

    /// Equality against a stored JSON cell.
    pub fn matches_json(&self, cell: &serde_json::Value) -> bool {
        match self {
            Value::Null => cell.is_null(),
            _ => self.cmp_json(cell) == Some(Ordering::Equal),
        }
    }

    /// Orders a stored JSON cell relative to this value (`cell.cmp(self)`).
    /// `None` when the two are not comparable (type mismatch or null).
    pub fn cmp_json(&self, cell: &serde_json::Value) -> Option<Ordering> {
        match (self, cell) {
            (Value::Bool(b), serde_json::Value::Bool(c)) => Some(c.cmp(b)),
            (Value::Int(i), serde_json::Value::Number(n)) => match n.as_i64() {
                Some(c) => Some(c.cmp(i)),
                None => n.as_f64().and_then(|c| c.partial_cmp(&(*i as f64))),
            },
            (Value::Float(f), serde_json::Value::Number(n)) => {
                n.as_f64().and_then(|c| c.partial_cmp(f))
            }
            (Value::Text(s), serde_json::Value::String(c)) => Some(c.as_str().cmp(s.as_str())),
            (Value::Uuid(u), serde_json::Value::String(c)) => {
                Uuid::parse_str(c).ok().map(|c| c.cmp(u))
            }
            (Value::Timestamp(t), serde_json::Value::String(c)) => DateTime::parse_from_rfc3339(c)
                .ok()
                .map(|c| c.with_timezone(&Utc).cmp(t)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Offset/limit window handed to a row source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

impl Window {
    pub fn end_exclusive(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }
}

/// Pagination request: everything, the first `n` rows, or an inclusive
/// zero-based `{start, end}` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    All,
    Limit {
        limit: usize,
    },
    Range {
        start: usize,
        end: usize,
    },
}

impl Pagination {
    pub fn limit(limit: usize) -> Self {
        Pagination::Limit { limit }
    }

    /// One-based page number. `page(2, 10)` covers rows 11–20.
    pub fn page(page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = (page - 1).saturating_mul(page_size);
        Pagination::Range {
            start,
            end: start.saturating_add(page_size - 1),
        }
    }

    pub fn window(&self) -> Option<Window> {
        match *self {
            Pagination::All => None,
            Pagination::Limit { limit } => Some(Window { offset: 0, limit }),
            Pagination::Range { start, end } => Some(Window {
                offset: start,
                limit: end.saturating_sub(start).saturating_add(1),
            }),
        }
    }
}

/// Result of one visibility-scoped fetch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchResult {
    pub rows: Vec<Row>,
    /// Exact count of matching rows, present only when requested.
    pub count: Option<u64>,
    /// True when the rows came from a client-side merge of sub-queries.
    pub merged: bool,
}

impl FetchResult {
    pub fn empty(count_requested: bool) -> Self {
        Self {
            rows: Vec::new(),
            count: count_requested.then_some(0),
            merged: false,
        }
    }

    pub fn total_pages(&self, page_size: usize) -> Option<u64> {
        let page_size = page_size.max(1) as u64;
        self.count.map(|c| c.div_ceil(page_size))
    }

    pub fn into_paged(self, page_size: usize) -> PagedResult {
        let total_pages = self.total_pages(page_size);
        PagedResult {
            data: self.rows,
            count: self.count,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult {
    pub data: Vec<Row>,
    pub count: Option<u64>,
    pub total_pages: Option<u64>,
}

/// How string cells of one sort column compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrder {
    Lexical,
    /// Every string cell in the column is an RFC 3339 timestamp.
    Chronological,
}

impl TextOrder {
    /// Chronological only when every string cell parses as RFC 3339, so a
    /// column never mixes the two orders.
    pub fn for_cells<'a>(cells: impl IntoIterator<Item = &'a serde_json::Value>) -> Self {
        let mut any = false;
        for cell in cells {
            if let serde_json::Value::String(s) = cell {
                if DateTime::parse_from_rfc3339(s).is_err() {
                    return TextOrder::Lexical;
                }
                any = true;
            }
        }
        if any {
            TextOrder::Chronological
        } else {
            TextOrder::Lexical
        }
    }
}

/// Total order over JSON cells used when re-sorting merged pages.
///
/// Mirrors Postgres defaults: nulls (and missing cells) sort after every
/// value in ascending order.
pub fn compare_json(a: &serde_json::Value, b: &serde_json::Value, text: TextOrder) -> Ordering {
    use serde_json::Value as J;
    match (a, b) {
        (J::Null, J::Null) => Ordering::Equal,
        (J::Null, _) => Ordering::Greater,
        (_, J::Null) => Ordering::Less,
        (J::Bool(x), J::Bool(y)) => x.cmp(y),
        (J::Number(x), J::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (J::String(x), J::String(y)) => match text {
            TextOrder::Lexical => x.cmp(y),
            TextOrder::Chronological => {
                match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                }
            }
        },
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &serde_json::Value) -> u8 {
    match v {
        serde_json::Value::Bool(_) => 0,
        serde_json::Value::Number(_) => 1,
        serde_json::Value::String(_) => 2,
        serde_json::Value::Array(_) => 3,
        serde_json::Value::Object(_) => 4,
        serde_json::Value::Null => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_two_of_ten_covers_rows_eleven_to_twenty() {
        let p = Pagination::page(2, 10);
        assert_eq!(p, Pagination::Range { start: 10, end: 19 });
        assert_eq!(p.window(), Some(Window { offset: 10, limit: 10 }));
    }

    #[test]
    fn huge_page_numbers_saturate() {
        let p = Pagination::page(usize::MAX, 10);
        assert_eq!(
            p,
            Pagination::Range {
                start: usize::MAX,
                end: usize::MAX
            }
        );
        assert_eq!(p.window().map(|w| w.end_exclusive()), Some(usize::MAX));
    }

    #[test]
    fn page_zero_is_clamped_to_first_page() {
        assert_eq!(Pagination::page(0, 5), Pagination::Range { start: 0, end: 4 });
    }

    #[test]
    fn total_pages_rounds_up() {
        let r = FetchResult {
            rows: vec![],
            count: Some(25),
            merged: false,
        };
        assert_eq!(r.total_pages(10), Some(3));
        assert_eq!(FetchResult::empty(true).total_pages(10), Some(0));
        assert_eq!(FetchResult::empty(false).total_pages(10), None);
    }

    #[test]
    fn uuid_value_matches_case_insensitively() {
        let id = Uuid::new_v4();
        let cell = json!(id.to_string().to_uppercase());
        assert!(Value::Uuid(id).matches_json(&cell));
    }

    #[test]
    fn timestamp_value_compares_chronologically() {
        let t: DateTime<Utc> = "2025-03-01T00:00:00Z".parse().unwrap();
        let later = json!("2025-03-01T05:00:00+02:00");
        assert_eq!(Value::Timestamp(t).cmp_json(&later), Some(Ordering::Greater));
    }

    #[test]
    fn nulls_sort_last() {
        let lexical = TextOrder::Lexical;
        assert_eq!(compare_json(&json!(null), &json!(1), lexical), Ordering::Greater);
        assert_eq!(compare_json(&json!("a"), &json!(null), lexical), Ordering::Less);
    }

    #[test]
    fn text_order_is_chronological_only_for_pure_timestamp_columns() {
        let stamps = [json!("2025-03-01T05:00:00+02:00"), json!("2025-03-01T04:00:00Z"), json!(null)];
        let order = TextOrder::for_cells(&stamps);
        assert_eq!(order, TextOrder::Chronological);
        assert_eq!(compare_json(&stamps[0], &stamps[1], order), Ordering::Less);

        let mixed = [json!("2025-03-01T05:00:00+02:00"), json!("2025-03-01T04:00:00Z"), json!("b")];
        let order = TextOrder::for_cells(&mixed);
        assert_eq!(order, TextOrder::Lexical);
        assert_eq!(compare_json(&mixed[0], &mixed[1], order), Ordering::Greater);
        assert_eq!(TextOrder::for_cells(&[json!(1)]), TextOrder::Lexical);
    }

    #[test]
    fn mismatched_types_do_not_match() {
        assert!(!Value::Int(1).matches_json(&json!("1")));
        assert!(!Value::Bool(true).matches_json(&json!(null)));
        assert!(Value::Null.matches_json(&json!(null)));
    }
}
