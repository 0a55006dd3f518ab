//! In-memory implementations of the store and lookup ports.
//!
//! Evaluates compiled clauses over JSON rows with the same semantics the
//! Postgres adapter emits. Used by tests and by local tooling.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LookupError, StoreError};
use crate::filter::{Clause, Filter, RangeBound};
use crate::merge::{project, sort_rows};
use crate::scope::{ReferenceLookup, ScopeLookup, VisibilityScope};
use crate::store::{RowSource, SelectRequest, SelectResponse, StoreCapabilities};
use crate::types::Row;

// ── MemoryStore ───────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Row>>>,
    capabilities: StoreCapabilities,
    failing: RwLock<HashSet<String>>,
    queries: RwLock<Vec<SelectRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that cannot combine clauses with OR, forcing split merges.
    pub fn without_disjunction() -> Self {
        Self {
            capabilities: StoreCapabilities { disjunction: false },
            ..Default::default()
        }
    }

    pub async fn insert(&self, collection: &str, rows: impl IntoIterator<Item = Row>) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every subsequent query against `collection` fail.
    pub async fn fail_on(&self, collection: &str) {
        self.failing.write().await.insert(collection.to_string());
    }

    /// Every request served so far, in arrival order.
    pub async fn queries(&self) -> Vec<SelectRequest> {
        self.queries.read().await.clone()
    }
}

#[async_trait]
impl RowSource for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError> {
        self.queries.write().await.push(request.clone());

        if self.failing.read().await.contains(&request.collection) {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "simulated failure for '{}'",
                request.collection
            )));
        }
        if !self.capabilities.disjunction
            && request
                .clauses
                .iter()
                .any(|c| matches!(c, Clause::AnyOf { .. }))
        {
            return Err(StoreError::Unsupported(
                "disjunction is not supported by this store".into(),
            ));
        }

        let collections = self.collections.read().await;
        let rows = collections
            .get(&request.collection)
            .ok_or_else(|| StoreError::UnknownCollection(request.collection.clone()))?;

        let mut matched: Vec<Row> = rows
            .iter()
            .filter(|row| request.clauses.iter().all(|c| clause_matches(c, row)))
            .cloned()
            .collect();
        let count = request.count.then_some(matched.len() as u64);

        sort_rows(&mut matched, &request.sort);
        if let Some(window) = request.window {
            matched = matched
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .collect();
        }
        let rows = matched
            .into_iter()
            .map(|row| project(row, &request.fields))
            .collect();

        Ok(SelectResponse { rows, count })
    }
}

pub fn clause_matches(clause: &Clause, row: &Row) -> bool {
    match clause {
        Clause::Filter(f) => filter_matches(f, row),
        Clause::NotTrue { column } => !matches!(row.get(column), Some(serde_json::Value::Bool(true))),
        Clause::AnyOf { clauses } => clauses.iter().any(|c| clause_matches(c, row)),
    }
}

fn filter_matches(filter: &Filter, row: &Row) -> bool {
    let null = serde_json::Value::Null;
    let cell = row.get(filter.column()).unwrap_or(&null);
    match filter {
        Filter::Equals { value, .. } => value.matches_json(cell),
        Filter::In { values, .. } => values.iter().any(|v| v.matches_json(cell)),
        Filter::Overlaps { values, .. } => match cell {
            serde_json::Value::Array(items) => items
                .iter()
                .any(|item| values.iter().any(|v| v.matches_json(item))),
            _ => false,
        },
        Filter::Range { lower, upper, .. } => {
            bound_holds(lower.as_ref(), cell, true) && bound_holds(upper.as_ref(), cell, false)
        }
    }
}

fn bound_holds(bound: Option<&RangeBound>, cell: &serde_json::Value, is_lower: bool) -> bool {
    use std::cmp::Ordering;
    let Some(bound) = bound else {
        return true;
    };
    match bound.value.cmp_json(cell) {
        Some(Ordering::Equal) => bound.inclusive,
        Some(Ordering::Greater) => is_lower,
        Some(Ordering::Less) => !is_lower,
        None => false,
    }
}

// ── Lookups ───────────────────────────────────────────────────

#[derive(Default)]
pub struct StaticScopeLookup {
    scopes: HashMap<Uuid, VisibilityScope>,
    delays: HashMap<Uuid, Duration>,
    fail: bool,
}

impl StaticScopeLookup {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with(mut self, caller_id: Uuid, scope: VisibilityScope) -> Self {
        self.scopes.insert(caller_id, scope);
        self
    }

    /// Delay lookups for one caller, to exercise stale-result handling.
    pub fn with_delay(mut self, caller_id: Uuid, delay: Duration) -> Self {
        self.delays.insert(caller_id, delay);
        self
    }
}

#[async_trait]
impl ScopeLookup for StaticScopeLookup {
    async fn lookup_scope(
        &self,
        caller_id: Uuid,
    ) -> Result<Option<VisibilityScope>, LookupError> {
        if let Some(delay) = self.delays.get(&caller_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail {
            return Err(LookupError::Unavailable("scope lookup disabled".into()));
        }
        Ok(self.scopes.get(&caller_id).cloned())
    }
}

#[derive(Default)]
pub struct StaticReferenceLookup {
    region_id: Option<Uuid>,
    jurisdiction_ids: BTreeSet<Uuid>,
    fail: bool,
    member_calls: Arc<AtomicUsize>,
}

impl StaticReferenceLookup {
    pub fn new(region_id: Option<Uuid>, jurisdiction_ids: BTreeSet<Uuid>) -> Self {
        Self {
            region_id,
            jurisdiction_ids,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Counts calls to `region_jurisdiction_ids`.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.member_calls.clone()
    }
}

#[async_trait]
impl ReferenceLookup for StaticReferenceLookup {
    async fn region_id(&self, _region_code: &str) -> Result<Option<Uuid>, LookupError> {
        if self.fail {
            return Err(LookupError::Unavailable("reference lookup disabled".into()));
        }
        Ok(self.region_id)
    }

    async fn region_jurisdiction_ids(
        &self,
        _region_code: &str,
    ) -> Result<BTreeSet<Uuid>, LookupError> {
        self.member_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail {
            return Err(LookupError::Unavailable("reference lookup disabled".into()));
        }
        Ok(self.jurisdiction_ids.clone())
    }
}
