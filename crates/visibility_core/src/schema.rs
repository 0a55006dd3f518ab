//! Per-collection schema metadata and per-call fetch options.
//!
//! Collections in the backing store are inconsistent: some lack a publish
//! flag, some lack a soft-delete column, some store soft-delete as a
//! nullable boolean. Every column the compiler touches comes from here.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisibilityError};
use crate::filter::{Clause, Filter};
use crate::types::{Pagination, SortSpec, Value};

/// Soft-delete capability of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum SoftDelete {
    /// No soft-delete column; every row is live.
    #[default]
    None,
    /// Live rows have the column set to exactly `false`.
    StrictFalse(String),
    /// Live rows have the column `null` or `false`.
    NullOrFalse(String),
}

impl SoftDelete {
    pub fn column(&self) -> Option<&str> {
        match self {
            SoftDelete::None => None,
            SoftDelete::StrictFalse(c) | SoftDelete::NullOrFalse(c) => Some(c),
        }
    }

    pub fn exclusion(&self) -> Option<Clause> {
        match self {
            SoftDelete::None => None,
            SoftDelete::StrictFalse(c) => Some(Filter::eq(c.clone(), false).into()),
            SoftDelete::NullOrFalse(c) => Some(Clause::NotTrue { column: c.clone() }),
        }
    }
}

/// Array/boolean columns used by strategic-plan alignment filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StrategicColumns {
    pub plan_column: Option<String>,
    pub objective_column: Option<String>,
    pub derived_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub collection: String,
    pub id_column: String,
    pub jurisdiction_column: Option<String>,
    pub sector_column: Option<String>,
    pub published_column: Option<String>,
    pub status_column: Option<String>,
    /// Status values safe to show at the public level when the collection
    /// has no publish flag.
    pub public_statuses: Vec<String>,
    pub soft_delete: SoftDelete,
    pub default_sort: Vec<SortSpec>,
    pub strategic: Option<StrategicColumns>,
    /// Refuse client-side merged pagination for this collection.
    pub strict_pagination: bool,
    pub cache_ttl: Duration,
}

impl CollectionSchema {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id_column: "id".into(),
            jurisdiction_column: None,
            sector_column: None,
            published_column: None,
            status_column: None,
            public_statuses: Vec::new(),
            soft_delete: SoftDelete::None,
            default_sort: vec![SortSpec::desc("created_at")],
            strategic: None,
            strict_pagination: false,
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }

    pub fn id_column(mut self, column: &str) -> Self {
        self.id_column = column.to_string();
        self
    }

    pub fn jurisdiction(mut self, column: &str) -> Self {
        self.jurisdiction_column = Some(column.to_string());
        self
    }

    pub fn sector(mut self, column: &str) -> Self {
        self.sector_column = Some(column.to_string());
        self
    }

    pub fn published(mut self, column: &str) -> Self {
        self.published_column = Some(column.to_string());
        self
    }

    pub fn public_statuses(mut self, column: &str, statuses: &[&str]) -> Self {
        self.status_column = Some(column.to_string());
        self.public_statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn status_column(mut self, column: &str) -> Self {
        self.status_column = Some(column.to_string());
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = soft_delete;
        self
    }

    pub fn sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.default_sort = sort;
        self
    }

    pub fn strategic(mut self, columns: StrategicColumns) -> Self {
        self.strategic = Some(columns);
        self
    }

    pub fn strict_pagination(mut self) -> Self {
        self.strict_pagination = true;
        self
    }

    pub fn cache_minutes(mut self, minutes: u64) -> Self {
        self.cache_ttl = Duration::from_secs(minutes * 60);
        self
    }

    /// Validates every identifier the compiler may splice into a query.
    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.collection)?;
        check_identifier(&self.id_column)?;
        for column in [
            &self.jurisdiction_column,
            &self.sector_column,
            &self.published_column,
            &self.status_column,
        ]
        .into_iter()
        .flatten()
        {
            check_identifier(column)?;
        }
        if let Some(c) = self.soft_delete.column() {
            check_identifier(c)?;
        }
        if let Some(s) = &self.strategic {
            for column in [&s.plan_column, &s.objective_column, &s.derived_column]
                .into_iter()
                .flatten()
            {
                check_identifier(column)?;
            }
        }
        for s in &self.default_sort {
            check_identifier(&s.column)?;
        }
        Ok(())
    }
}

/// How the geographic rule may be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Single combinable filter when the store supports it, split otherwise.
    #[default]
    Auto,
    /// Always issue own/national sub-queries and merge client-side.
    ForceSplit,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    pub filters: Vec<Filter>,
    /// Overrides the collection's default sort when non-empty.
    pub sort: Vec<SortSpec>,
    pub pagination: Pagination,
    /// Request an exact count of all matching rows.
    pub count: bool,
    /// Honoured only at the global level.
    pub include_deleted: bool,
    pub merge_mode: MergeMode,
}

/// Everything one call site supplies to the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuerySpec {
    pub schema: CollectionSchema,
    /// Empty selects every column.
    pub fields: Vec<String>,
    pub options: FetchOptions,
}

impl EntityQuerySpec {
    pub fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            fields: Vec::new(),
            options: FetchOptions::default(),
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.options.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.options.sort.push(sort);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.options.pagination = pagination;
        self
    }

    pub fn with_count(mut self) -> Self {
        self.options.count = true;
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.options.include_deleted = true;
        self
    }

    pub fn merge_mode(mut self, mode: MergeMode) -> Self {
        self.options.merge_mode = mode;
        self
    }

    pub fn collection(&self) -> &str {
        &self.schema.collection
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        for field in &self.fields {
            if field != "*" {
                check_identifier(field)?;
            }
        }
        for filter in &self.options.filters {
            check_identifier(filter.column())?;
            if let Filter::In { values, .. } | Filter::Overlaps { values, .. } = filter {
                if values.iter().any(|v| matches!(v, Value::Null)) {
                    return Err(VisibilityError::InvalidRequest(format!(
                        "null is not a valid member in filter on '{}'",
                        filter.column()
                    )));
                }
            }
        }
        for s in &self.options.sort {
            check_identifier(&s.column)?;
        }
        if let Pagination::Range { start, end } = self.options.pagination {
            if end < start {
                return Err(VisibilityError::InvalidRequest(format!(
                    "range end {end} precedes start {start}"
                )));
            }
        }
        if let Some(window) = self.options.pagination.window() {
            if window.end_exclusive() > MAX_ROW_POSITION {
                return Err(VisibilityError::InvalidRequest(format!(
                    "window ending at row {} is out of range",
                    window.end_exclusive()
                )));
            }
        }
        Ok(())
    }
}

/// Largest row position a store accepts as `LIMIT`/`OFFSET` (a signed 64-bit bigint).
const MAX_ROW_POSITION: usize = i64::MAX as usize;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(VisibilityError::InvalidRequest(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenges() -> CollectionSchema {
        CollectionSchema::new("challenges")
            .jurisdiction("municipality_id")
            .sector("sector_id")
            .published("is_published")
            .soft_delete(SoftDelete::StrictFalse("is_deleted".into()))
    }

    #[test]
    fn strict_false_excludes_with_equality() {
        let c = SoftDelete::StrictFalse("is_deleted".into()).exclusion().unwrap();
        assert_eq!(c, Clause::Filter(Filter::eq("is_deleted", false)));
    }

    #[test]
    fn null_or_false_excludes_with_not_true() {
        let c = SoftDelete::NullOrFalse("is_deleted".into()).exclusion().unwrap();
        assert_eq!(
            c,
            Clause::NotTrue {
                column: "is_deleted".into()
            }
        );
        assert!(SoftDelete::None.exclusion().is_none());
    }

    #[test]
    fn rejects_injected_column_names() {
        let spec = EntityQuerySpec::new(challenges()).filter(Filter::eq("status; drop table x", "open"));
        assert!(matches!(
            spec.validate(),
            Err(VisibilityError::InvalidRequest(_))
        ));
        let schema = challenges().sector("sector id");
        assert!(schema.validate().is_err());
    }

    #[test]
    fn star_field_is_allowed() {
        let spec = EntityQuerySpec::new(challenges()).fields(&["*"]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let spec = EntityQuerySpec::new(challenges()).paginate(Pagination::Range { start: 5, end: 2 });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let spec = EntityQuerySpec::new(challenges()).paginate(Pagination::page(usize::MAX, 10));
        assert!(matches!(
            spec.validate(),
            Err(VisibilityError::InvalidRequest(_))
        ));
        let deep = EntityQuerySpec::new(challenges()).paginate(Pagination::page(100_000, 50));
        assert!(deep.validate().is_ok());
    }

    #[test]
    fn null_membership_is_rejected() {
        let spec = EntityQuerySpec::new(challenges()).filter(Filter::In {
            column: "status".into(),
            values: vec![Value::Null],
        });
        assert!(spec.validate().is_err());
    }
}
