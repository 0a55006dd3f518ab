//! Strategic-plan alignment filters.
//!
//! A second filtering dimension layered on top of visibility. The filters
//! are appended to the caller filters and then go through the same
//! `compiler::compile` / `compiler::execute` pair, so every level, the
//! geographic merge and soft-delete handling behave exactly as for a plain
//! fetch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compiler::{compile, execute, CompiledQuery};
use crate::error::{Result, VisibilityError};
use crate::filter::Filter;
use crate::policy::VisibilityPolicy;
use crate::schema::{EntityQuerySpec, StrategicColumns};
use crate::store::{RowSource, StoreCapabilities};
use crate::types::FetchResult;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrategicFilters {
    /// Rows aligned with at least one of these plans.
    pub plan_ids: Vec<Uuid>,
    /// Rows aligned with at least one of these objectives.
    pub objective_ids: Vec<Uuid>,
    /// Restrict to rows whose alignment was (or was not) derived.
    pub derived_only: Option<bool>,
}

impl StrategicFilters {
    pub fn plans(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            plan_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn objectives(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.objective_ids = ids.into_iter().collect();
        self
    }

    pub fn derived_only(mut self, derived: bool) -> Self {
        self.derived_only = Some(derived);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.plan_ids.is_empty() && self.objective_ids.is_empty() && self.derived_only.is_none()
    }

    /// Filters for this selection. A requested dimension the collection has
    /// no column for is an error, not a silently dropped filter.
    pub fn to_filters(
        &self,
        collection: &str,
        columns: Option<&StrategicColumns>,
    ) -> Result<Vec<Filter>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let missing = |what: &str| {
            VisibilityError::InvalidRequest(format!(
                "'{collection}' has no {what} column for strategic filtering"
            ))
        };
        let empty = StrategicColumns::default();
        let columns = columns.unwrap_or(&empty);

        let mut filters = Vec::new();
        if !self.plan_ids.is_empty() {
            let column = columns.plan_column.as_ref().ok_or_else(|| missing("plan"))?;
            filters.push(Filter::overlaps(column.clone(), self.plan_ids.iter().copied()));
        }
        if !self.objective_ids.is_empty() {
            let column = columns
                .objective_column
                .as_ref()
                .ok_or_else(|| missing("objective"))?;
            filters.push(Filter::overlaps(
                column.clone(),
                self.objective_ids.iter().copied(),
            ));
        }
        if let Some(derived) = self.derived_only {
            let column = columns
                .derived_column
                .as_ref()
                .ok_or_else(|| missing("derived"))?;
            filters.push(Filter::eq(column.clone(), derived));
        }
        Ok(filters)
    }
}

/// The spec with strategic filters appended to its caller filters.
pub fn with_strategic(spec: &EntityQuerySpec, strategic: &StrategicFilters) -> Result<EntityQuerySpec> {
    let extra = strategic.to_filters(&spec.schema.collection, spec.schema.strategic.as_ref())?;
    let mut spec = spec.clone();
    spec.options.filters.extend(extra);
    Ok(spec)
}

pub fn compile_strategic(
    spec: &EntityQuerySpec,
    strategic: &StrategicFilters,
    policy: &VisibilityPolicy,
    capabilities: StoreCapabilities,
) -> Result<CompiledQuery> {
    compile(&with_strategic(spec, strategic)?, policy, capabilities)
}

pub async fn fetch_with_strategic_visibility(
    source: &dyn RowSource,
    spec: &EntityQuerySpec,
    strategic: &StrategicFilters,
    policy: &VisibilityPolicy,
) -> Result<FetchResult> {
    let compiled = compile_strategic(spec, strategic, policy, source.capabilities())?;
    execute(source, &compiled).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Clause;
    use crate::memory::MemoryStore;
    use crate::policy::VisibilityLevel;
    use crate::schema::{CollectionSchema, SoftDelete};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn programs() -> CollectionSchema {
        CollectionSchema::new("programs")
            .jurisdiction("municipality_id")
            .sector("sector_id")
            .published("is_published")
            .soft_delete(SoftDelete::StrictFalse("is_deleted".into()))
            .strategic(StrategicColumns {
                plan_column: Some("strategic_plan_ids".into()),
                objective_column: Some("strategic_objective_ids".into()),
                derived_column: Some("is_derived".into()),
            })
    }

    fn geographic(home: Uuid, national: Uuid) -> VisibilityPolicy {
        VisibilityPolicy {
            level: VisibilityLevel::Geographic,
            home_jurisdiction_id: Some(home),
            national_jurisdiction_ids: BTreeSet::from([national]),
            ..VisibilityPolicy::public()
        }
    }

    #[test]
    fn empty_selection_adds_nothing() {
        let filters = StrategicFilters::default()
            .to_filters("programs", programs().strategic.as_ref())
            .unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn missing_column_is_rejected() {
        let err = StrategicFilters::plans([Uuid::new_v4()])
            .to_filters("events", None)
            .unwrap_err();
        assert!(matches!(err, VisibilityError::InvalidRequest(_)));
    }

    #[test]
    fn strategic_filters_compose_with_visibility() {
        let plan = Uuid::new_v4();
        let spec = EntityQuerySpec::new(programs());
        let compiled = compile_strategic(
            &spec,
            &StrategicFilters::plans([plan]).derived_only(true),
            &VisibilityPolicy::public(),
            StoreCapabilities::default(),
        )
        .unwrap();
        let clauses = &compiled.requests()[0].clauses;
        assert!(clauses.contains(&Clause::from(Filter::overlaps("strategic_plan_ids", [plan]))));
        assert!(clauses.contains(&Clause::from(Filter::eq("is_derived", true))));
        assert!(clauses.contains(&Clause::from(Filter::eq("is_published", true))));
        assert!(clauses.contains(&Clause::from(Filter::eq("is_deleted", false))));
    }

    #[tokio::test]
    async fn geographic_strategic_fetch_uses_shared_merge() {
        let (m1, m9, m2, plan) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let store = MemoryStore::without_disjunction();
        let rows = [
            json!({"id": "p1", "municipality_id": m1, "strategic_plan_ids": [plan], "is_deleted": false, "created_at": "2025-03-01T00:00:00Z"}),
            json!({"id": "p2", "municipality_id": m9, "strategic_plan_ids": [plan], "is_deleted": false, "created_at": "2025-02-01T00:00:00Z"}),
            json!({"id": "p3", "municipality_id": m9, "strategic_plan_ids": [], "is_deleted": false, "created_at": "2025-01-01T00:00:00Z"}),
            json!({"id": "p4", "municipality_id": m2, "strategic_plan_ids": [plan], "is_deleted": false, "created_at": "2025-01-01T00:00:00Z"}),
        ];
        store
            .insert(
                "programs",
                rows.into_iter().map(|v| v.as_object().cloned().unwrap()),
            )
            .await;

        let result = fetch_with_strategic_visibility(
            &store,
            &EntityQuerySpec::new(programs()).with_count(),
            &StrategicFilters::plans([plan]),
            &geographic(m1, m9),
        )
        .await
        .unwrap();

        assert!(result.merged);
        assert_eq!(result.count, Some(2));
        let ids: Vec<_> = result.rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("p1"), json!("p2")]);
    }
}
