//! Merge-and-dedupe for client-side unions of independently fetched pages.
//!
//! Shared by the geographic path of the compiler and the strategic-plan
//! extension. Pages are concatenated in the order given, deduplicated by id
//! (first occurrence wins), stably re-sorted by the declared key, then cut to
//! the requested window.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{compare_json, Row, SortDirection, SortSpec, TextOrder, Window};

/// A sort key paired with the text order its column uses in one row set.
struct ResolvedKey<'a> {
    spec: &'a SortSpec,
    text: TextOrder,
}

fn resolve_keys<'a>(rows: &[Row], sort: &'a [SortSpec]) -> Vec<ResolvedKey<'a>> {
    sort.iter()
        .map(|spec| ResolvedKey {
            spec,
            text: TextOrder::for_cells(rows.iter().filter_map(|r| r.get(&spec.column))),
        })
        .collect()
}

fn compare_rows(a: &Row, b: &Row, keys: &[ResolvedKey<'_>]) -> Ordering {
    let null = serde_json::Value::Null;
    for key in keys {
        let left = a.get(&key.spec.column).unwrap_or(&null);
        let right = b.get(&key.spec.column).unwrap_or(&null);
        let ord = match key.spec.direction {
            SortDirection::Asc => compare_json(left, right, key.text),
            SortDirection::Desc => compare_json(right, left, key.text),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort; rows equal under `sort` keep their relative order.
pub fn sort_rows(rows: &mut [Row], sort: &[SortSpec]) {
    if sort.is_empty() {
        return;
    }
    let keys = resolve_keys(rows, sort);
    rows.sort_by(|a, b| compare_rows(a, b, &keys));
}

/// Removes rows whose id was already seen. Rows without an id are kept.
pub fn dedupe_by_id(rows: impl IntoIterator<Item = Row>, id_column: &str) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| match row.get(id_column) {
            Some(id) if !id.is_null() => seen.insert(id.to_string()),
            _ => true,
        })
        .collect()
}

/// Keeps only `fields`. Empty or `*` keeps the whole row.
pub fn project(row: Row, fields: &[String]) -> Row {
    if fields.is_empty() || fields.iter().any(|f| f == "*") {
        return row;
    }
    row.into_iter()
        .filter(|(k, _)| fields.iter().any(|f| f == k))
        .collect()
}

pub fn merge_pages(
    pages: Vec<Vec<Row>>,
    id_column: &str,
    sort: &[SortSpec],
    window: Option<Window>,
) -> Vec<Row> {
    let mut rows = dedupe_by_id(pages.into_iter().flatten(), id_column);
    sort_rows(&mut rows, sort);
    match window {
        Some(w) => rows.into_iter().skip(w.offset).take(w.limit).collect(),
        None => rows,
    }
}
