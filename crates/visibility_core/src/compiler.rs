//! Query compiler — turns a resolved policy plus collection metadata into
//! backing-store requests, and executes them.
//!
//! Compilation is pure: the same `(spec, policy, capabilities)` always
//! yields the same `CompiledQuery`. Execution is the only place that talks
//! to a `RowSource`.
//!
//! ## Geographic level
//!
//! Rule: `jurisdiction = home OR jurisdiction IN national`. When the store
//! supports a combinable OR the rule is one clause and the store paginates
//! and counts natively. Otherwise two sub-queries run concurrently, each
//! fetching the first `offset + limit` rows, and the merge re-sorts and cuts
//! the requested window. The split path is exact for a quiescent store but
//! not under concurrent writes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, VisibilityError};
use crate::filter::{describe, Clause, Filter};
use crate::merge::{merge_pages, project};
use crate::policy::{VisibilityLevel, VisibilityPolicy};
use crate::schema::{EntityQuerySpec, MergeMode};
use crate::store::{RowSource, SelectRequest, SelectResponse, StoreCapabilities};
use crate::types::{FetchResult, SortSpec, Value, Window};

/// The visibility restriction a compiled query carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum VisibilityRule {
    Unrestricted,
    Sector {
        column: String,
        sector_ids: BTreeSet<Uuid>,
    },
    Jurisdiction {
        column: String,
        home: Option<Uuid>,
        national: BTreeSet<Uuid>,
    },
    Published {
        column: String,
    },
    PublicStatus {
        column: String,
        statuses: Vec<String>,
    },
}

/// Two sub-queries whose union is the visible set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub own: SelectRequest,
    pub national: SelectRequest,
    pub id_column: String,
    /// Fields the caller asked for; sub-queries may fetch more.
    pub fields: Vec<String>,
    pub sort: Vec<SortSpec>,
    pub window: Option<Window>,
    pub count: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompiledQuery {
    Single {
        level: VisibilityLevel,
        rule: VisibilityRule,
        request: SelectRequest,
    },
    Merge {
        level: VisibilityLevel,
        rule: VisibilityRule,
        plan: MergePlan,
    },
    /// Nothing is visible; no query is issued.
    Empty {
        level: VisibilityLevel,
        collection: String,
        reason: String,
        count: bool,
    },
}

impl CompiledQuery {
    pub fn level(&self) -> VisibilityLevel {
        match self {
            CompiledQuery::Single { level, .. }
            | CompiledQuery::Merge { level, .. }
            | CompiledQuery::Empty { level, .. } => *level,
        }
    }

    pub fn rule(&self) -> Option<&VisibilityRule> {
        match self {
            CompiledQuery::Single { rule, .. } | CompiledQuery::Merge { rule, .. } => Some(rule),
            CompiledQuery::Empty { .. } => None,
        }
    }

    pub fn requests(&self) -> Vec<&SelectRequest> {
        match self {
            CompiledQuery::Single { request, .. } => vec![request],
            CompiledQuery::Merge { plan, .. } => vec![&plan.own, &plan.national],
            CompiledQuery::Empty { .. } => Vec::new(),
        }
    }

    /// Every column referenced by any clause of any request.
    pub fn filtered_columns(&self) -> BTreeSet<String> {
        self.requests()
            .into_iter()
            .flat_map(|r| r.clauses.iter().flat_map(Clause::columns))
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CompiledQuery::Empty { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CompiledQuery::Single { .. } => "single",
            CompiledQuery::Merge { .. } => "merge",
            CompiledQuery::Empty { .. } => "empty",
        }
    }
}

/// Shared state for one compilation.
struct Draft<'a> {
    spec: &'a EntityQuerySpec,
    base: Vec<Clause>,
    sort: Vec<SortSpec>,
    window: Option<Window>,
}

impl Draft<'_> {
    fn request(&self, restriction: Option<Clause>) -> SelectRequest {
        let mut clauses = self.base.clone();
        clauses.extend(restriction);
        SelectRequest {
            collection: self.spec.schema.collection.clone(),
            fields: self.spec.fields.clone(),
            clauses,
            sort: self.sort.clone(),
            window: self.window,
            count: self.spec.options.count,
        }
    }

    fn single(
        &self,
        level: VisibilityLevel,
        rule: VisibilityRule,
        restriction: Option<Clause>,
    ) -> CompiledQuery {
        CompiledQuery::Single {
            level,
            rule,
            request: self.request(restriction),
        }
    }

    fn empty(&self, level: VisibilityLevel, reason: impl Into<String>) -> CompiledQuery {
        CompiledQuery::Empty {
            level,
            collection: self.spec.schema.collection.clone(),
            reason: reason.into(),
            count: self.spec.options.count,
        }
    }
}

/// Declared sort (or the collection default) with the id column appended as
/// a final tie-breaker, so pages and merges are deterministic.
fn effective_sort(spec: &EntityQuerySpec) -> Vec<SortSpec> {
    let mut sort = if spec.options.sort.is_empty() {
        spec.schema.default_sort.clone()
    } else {
        spec.options.sort.clone()
    };
    let id = &spec.schema.id_column;
    if !sort.iter().any(|s| &s.column == id) {
        sort.push(SortSpec::asc(id.clone()));
    }
    sort
}

fn uuid_values(ids: &BTreeSet<Uuid>) -> Vec<Value> {
    ids.iter().copied().map(Value::Uuid).collect()
}

pub fn compile(
    spec: &EntityQuerySpec,
    policy: &VisibilityPolicy,
    capabilities: StoreCapabilities,
) -> Result<CompiledQuery> {
    spec.validate()?;

    let schema = &spec.schema;
    let options = &spec.options;
    let keep_deleted = options.include_deleted && policy.has_full_visibility;
    if options.include_deleted && !keep_deleted {
        debug!(
            collection = %schema.collection,
            level = %policy.level,
            "include_deleted ignored below global visibility"
        );
    }

    let mut base: Vec<Clause> = options.filters.iter().cloned().map(Clause::from).collect();
    if !keep_deleted {
        base.extend(schema.soft_delete.exclusion());
    }
    let draft = Draft {
        spec,
        base,
        sort: effective_sort(spec),
        window: options.pagination.window(),
    };

    if policy.has_full_visibility {
        return Ok(draft.single(VisibilityLevel::Global, VisibilityRule::Unrestricted, None));
    }

    match policy.level {
        VisibilityLevel::Global => {
            warn!(
                collection = %schema.collection,
                "Global level without full visibility, compiling as public"
            );
            Ok(public_rule(&draft, VisibilityLevel::Public))
        }
        VisibilityLevel::Sectoral => Ok(sectoral_rule(&draft, policy)),
        VisibilityLevel::Geographic => geographic_rule(&draft, policy, capabilities),
        VisibilityLevel::Public => Ok(public_rule(&draft, VisibilityLevel::Public)),
    }
}

fn sectoral_rule(draft: &Draft<'_>, policy: &VisibilityPolicy) -> CompiledQuery {
    let schema = &draft.spec.schema;
    let Some(column) = &schema.sector_column else {
        warn!(
            collection = %schema.collection,
            "No sector column, sectoral caller limited to public rows"
        );
        return public_rule(draft, VisibilityLevel::Sectoral);
    };
    if policy.sector_ids.is_empty() {
        return draft.empty(VisibilityLevel::Sectoral, "no sectors in scope");
    }
    draft.single(
        VisibilityLevel::Sectoral,
        VisibilityRule::Sector {
            column: column.clone(),
            sector_ids: policy.sector_ids.clone(),
        },
        Some(
            Filter::In {
                column: column.clone(),
                values: uuid_values(&policy.sector_ids),
            }
            .into(),
        ),
    )
}

fn geographic_rule(
    draft: &Draft<'_>,
    policy: &VisibilityPolicy,
    capabilities: StoreCapabilities,
) -> Result<CompiledQuery> {
    let level = VisibilityLevel::Geographic;
    let schema = &draft.spec.schema;
    let Some(column) = &schema.jurisdiction_column else {
        warn!(
            collection = %schema.collection,
            "No jurisdiction column, geographic caller limited to public rows"
        );
        return Ok(public_rule(draft, level));
    };
    let national = &policy.national_jurisdiction_ids;
    let rule = VisibilityRule::Jurisdiction {
        column: column.clone(),
        home: policy.home_jurisdiction_id,
        national: national.clone(),
    };
    let own_clause = |home: Uuid| -> Clause { Filter::eq(column.clone(), home).into() };
    let national_clause = || -> Clause {
        Filter::In {
            column: column.clone(),
            values: uuid_values(national),
        }
        .into()
    };

    let home = match policy.home_jurisdiction_id {
        None if national.is_empty() => {
            return Ok(draft.empty(level, "no jurisdictions in scope"));
        }
        None => return Ok(draft.single(level, rule, Some(national_clause()))),
        Some(home) if national.is_empty() => {
            return Ok(draft.single(level, rule, Some(own_clause(home))));
        }
        // Own rows are a subset of national rows.
        Some(home) if national.contains(&home) => {
            return Ok(draft.single(level, rule, Some(national_clause())));
        }
        Some(home) => home,
    };

    let split = !capabilities.disjunction || draft.spec.options.merge_mode == MergeMode::ForceSplit;
    if !split {
        let either = Clause::AnyOf {
            clauses: vec![own_clause(home), national_clause()],
        };
        return Ok(draft.single(level, rule, Some(either)));
    }

    if schema.strict_pagination && draft.window.is_some() {
        return Err(VisibilityError::InvalidRequest(format!(
            "'{}' requires exact pagination, which a client-side merge cannot guarantee",
            schema.collection
        )));
    }

    let sub_window = draft.window.map(|w| Window {
        offset: 0,
        limit: w.end_exclusive(),
    });
    let fields = merge_fields(draft);
    let sub_request = |restriction: Clause| {
        let mut request = draft.request(Some(restriction));
        request.window = sub_window;
        request.fields = fields.clone();
        request
    };

    Ok(CompiledQuery::Merge {
        level,
        rule,
        plan: MergePlan {
            own: sub_request(own_clause(home)),
            national: sub_request(national_clause()),
            id_column: schema.id_column.clone(),
            fields: draft.spec.fields.clone(),
            sort: draft.sort.clone(),
            window: draft.window,
            count: draft.spec.options.count,
        },
    })
}

/// Sub-queries must return the id and every sort column so the merge can
/// dedupe and re-sort; extras are projected away afterwards.
fn merge_fields(draft: &Draft<'_>) -> Vec<String> {
    let requested = &draft.spec.fields;
    if requested.is_empty() || requested.iter().any(|f| f == "*") {
        return requested.clone();
    }
    let mut fields = requested.clone();
    let needed = std::iter::once(&draft.spec.schema.id_column).chain(draft.sort.iter().map(|s| &s.column));
    for column in needed {
        if !fields.contains(column) {
            fields.push(column.clone());
        }
    }
    fields
}

fn public_rule(draft: &Draft<'_>, level: VisibilityLevel) -> CompiledQuery {
    let schema = &draft.spec.schema;
    if let Some(column) = &schema.published_column {
        return draft.single(
            level,
            VisibilityRule::Published {
                column: column.clone(),
            },
            Some(Filter::eq(column.clone(), true).into()),
        );
    }
    match &schema.status_column {
        Some(column) if !schema.public_statuses.is_empty() => draft.single(
            level,
            VisibilityRule::PublicStatus {
                column: column.clone(),
                statuses: schema.public_statuses.clone(),
            },
            Some(Filter::is_in(column.clone(), schema.public_statuses.iter().cloned()).into()),
        ),
        _ => draft.empty(level, "collection has no public visibility rule"),
    }
}

// ── Execution ─────────────────────────────────────────────────

async fn run(source: &dyn RowSource, request: &SelectRequest) -> Result<SelectResponse> {
    source
        .select(request)
        .await
        .map_err(|source| VisibilityError::QueryFailed {
            collection: request.collection.clone(),
            filters: describe(&request.clauses),
            source,
        })
}

pub async fn execute(source: &dyn RowSource, compiled: &CompiledQuery) -> Result<FetchResult> {
    match compiled {
        CompiledQuery::Empty {
            collection,
            reason,
            count,
            ..
        } => {
            debug!(%collection, %reason, "Visibility compiled to an empty result");
            Ok(FetchResult::empty(*count))
        }
        CompiledQuery::Single { request, .. } => {
            let response = run(source, request).await?;
            Ok(FetchResult {
                rows: response.rows,
                count: response.count,
                merged: false,
            })
        }
        CompiledQuery::Merge { plan, .. } => {
            let (own, national) = tokio::join!(run(source, &plan.own), run(source, &plan.national));
            let (own, national) = (own?, national?);

            // Sub-queries partition on distinct jurisdiction values.
            let count = if plan.count {
                own.count.zip(national.count).map(|(a, b)| a + b)
            } else {
                None
            };
            debug!(
                collection = %plan.own.collection,
                own = own.rows.len(),
                national = national.rows.len(),
                "Merging geographic sub-queries"
            );
            let rows = merge_pages(
                vec![own.rows, national.rows],
                &plan.id_column,
                &plan.sort,
                plan.window,
            )
            .into_iter()
            .map(|row| project(row, &plan.fields))
            .collect();
            Ok(FetchResult {
                rows,
                count,
                merged: true,
            })
        }
    }
}

/// Compile and execute in one step.
pub async fn fetch_with_visibility(
    source: &dyn RowSource,
    spec: &EntityQuerySpec,
    policy: &VisibilityPolicy,
) -> Result<FetchResult> {
    let compiled = compile(spec, policy, source.capabilities())?;
    debug!(
        collection = %spec.collection(),
        level = %compiled.level(),
        plan = compiled.kind(),
        "Compiled visibility query"
    );
    execute(source, &compiled).await
}
