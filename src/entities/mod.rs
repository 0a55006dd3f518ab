//! Per-collection configuration for every visibility-scoped entity.
//!
//! Collections disagree on column names, publish flags and soft-delete
//! semantics. All of that is declared here once; call sites never touch the
//! four-level dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use visibility_core::error::{Result, VisibilityError};
use visibility_core::filter::Filter;
use visibility_core::schema::{CollectionSchema, EntityQuerySpec, SoftDelete, StrategicColumns};
use visibility_core::types::SortSpec;

pub mod appliers;

const MUNICIPALITY: &str = "municipality_id";
const SECTOR: &str = "sector_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Challenges,
    Pilots,
    Programs,
    Solutions,
    LivingLabs,
    RdProjects,
    RdCalls,
    Contracts,
    Budgets,
    Events,
    Partnerships,
    Organizations,
    Sandboxes,
    CaseStudies,
    PolicyRecommendations,
    StrategicPlans,
    Incubators,
    ExpertAssignments,
    Campaigns,
    KnowledgeDocuments,
}

impl EntityKind {
    pub const ALL: [EntityKind; 20] = [
        EntityKind::Challenges,
        EntityKind::Pilots,
        EntityKind::Programs,
        EntityKind::Solutions,
        EntityKind::LivingLabs,
        EntityKind::RdProjects,
        EntityKind::RdCalls,
        EntityKind::Contracts,
        EntityKind::Budgets,
        EntityKind::Events,
        EntityKind::Partnerships,
        EntityKind::Organizations,
        EntityKind::Sandboxes,
        EntityKind::CaseStudies,
        EntityKind::PolicyRecommendations,
        EntityKind::StrategicPlans,
        EntityKind::Incubators,
        EntityKind::ExpertAssignments,
        EntityKind::Campaigns,
        EntityKind::KnowledgeDocuments,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Challenges => "challenges",
            EntityKind::Pilots => "pilots",
            EntityKind::Programs => "programs",
            EntityKind::Solutions => "solutions",
            EntityKind::LivingLabs => "living_labs",
            EntityKind::RdProjects => "rd_projects",
            EntityKind::RdCalls => "rd_calls",
            EntityKind::Contracts => "contracts",
            EntityKind::Budgets => "budgets",
            EntityKind::Events => "events",
            EntityKind::Partnerships => "partnerships",
            EntityKind::Organizations => "organizations",
            EntityKind::Sandboxes => "sandboxes",
            EntityKind::CaseStudies => "case_studies",
            EntityKind::PolicyRecommendations => "policy_recommendations",
            EntityKind::StrategicPlans => "strategic_plans",
            EntityKind::Incubators => "incubators",
            EntityKind::ExpertAssignments => "expert_assignments",
            EntityKind::Campaigns => "campaigns",
            EntityKind::KnowledgeDocuments => "knowledge_documents",
        }
    }

    pub fn schema(self) -> CollectionSchema {
        let base = CollectionSchema::new(self.collection());
        let strict = SoftDelete::StrictFalse("is_deleted".into());
        let nullable = SoftDelete::NullOrFalse("is_deleted".into());

        match self {
            EntityKind::Challenges => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .strategic(alignment())
                .cache_minutes(5),
            EntityKind::Pilots => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("stage", &["active", "completed", "scaling"])
                .soft_delete(nullable)
                .strategic(alignment())
                .cache_minutes(5),
            EntityKind::Programs => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .strategic(alignment())
                .cache_minutes(10),
            // Solutions belong to providers, not municipalities.
            EntityKind::Solutions => base
                .sector(SECTOR)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .cache_minutes(10),
            EntityKind::LivingLabs => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("status", &["active"])
                .sort(vec![SortSpec::asc("name")])
                .cache_minutes(15),
            EntityKind::RdProjects => base
                .jurisdiction("lead_municipality_id")
                .sector(SECTOR)
                .published("is_public")
                .status_column("status")
                .soft_delete(SoftDelete::NullOrFalse("is_archived".into()))
                .strategic(alignment())
                .cache_minutes(10),
            EntityKind::RdCalls => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("status", &["open", "closed"])
                .sort(vec![SortSpec::asc("deadline")])
                .cache_minutes(10),
            EntityKind::Contracts => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .status_column("status")
                .soft_delete(strict)
                .strict_pagination()
                .sort(vec![SortSpec::desc("signed_at")])
                .cache_minutes(5),
            EntityKind::Budgets => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .status_column("status")
                .soft_delete(nullable)
                .strict_pagination()
                .strategic(StrategicColumns {
                    plan_column: Some("strategic_plan_ids".into()),
                    objective_column: None,
                    derived_column: None,
                })
                .sort(vec![SortSpec::desc("fiscal_year")])
                .cache_minutes(5),
            EntityKind::Events => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .sort(vec![SortSpec::asc("start_date")])
                .cache_minutes(2),
            // Partnerships span sectors and carry no sector column.
            EntityKind::Partnerships => base
                .jurisdiction(MUNICIPALITY)
                .public_statuses("status", &["active"])
                .cache_minutes(15),
            EntityKind::Organizations => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("verification_status", &["verified"])
                .sort(vec![SortSpec::asc("name")])
                .cache_minutes(30),
            EntityKind::Sandboxes => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("status", &["active", "graduated"])
                .soft_delete(nullable)
                .cache_minutes(15),
            EntityKind::CaseStudies => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_published")
                .soft_delete(strict)
                .cache_minutes(30),
            EntityKind::PolicyRecommendations => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("status", &["adopted", "published"])
                .strategic(alignment())
                .cache_minutes(15),
            EntityKind::StrategicPlans => base
                .jurisdiction(MUNICIPALITY)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .sort(vec![SortSpec::desc("start_year")])
                .cache_minutes(30),
            EntityKind::Incubators => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .public_statuses("status", &["active"])
                .sort(vec![SortSpec::asc("name")])
                .cache_minutes(30),
            EntityKind::ExpertAssignments => base
                .id_column("assignment_id")
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .status_column("status")
                .soft_delete(nullable)
                .sort(vec![SortSpec::desc("assigned_at")])
                .cache_minutes(5),
            EntityKind::Campaigns => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_published")
                .status_column("status")
                .soft_delete(strict)
                .sort(vec![SortSpec::desc("launch_date")])
                .cache_minutes(5),
            EntityKind::KnowledgeDocuments => base
                .jurisdiction(MUNICIPALITY)
                .sector(SECTOR)
                .published("is_public")
                .soft_delete(SoftDelete::NullOrFalse("is_archived".into()))
                .strategic(StrategicColumns {
                    plan_column: None,
                    objective_column: Some("strategic_objective_ids".into()),
                    derived_column: None,
                })
                .sort(vec![SortSpec::desc("updated_at")])
                .cache_minutes(60),
        }
    }

    /// A fresh query against this collection with default options.
    pub fn query(self) -> EntityQuerySpec {
        EntityQuerySpec::new(self.schema())
    }

    /// Filter on the collection's status column.
    pub fn status_filter(self, statuses: &[&str]) -> Result<Filter> {
        let schema = self.schema();
        let column = schema.status_column.ok_or_else(|| {
            VisibilityError::InvalidRequest(format!("'{}' has no status column", self.collection()))
        })?;
        Ok(match statuses {
            [single] => Filter::eq(column, *single),
            many => Filter::is_in(column, many.iter().copied()),
        })
    }
}

fn alignment() -> StrategicColumns {
    StrategicColumns {
        plan_column: Some("strategic_plan_ids".into()),
        objective_column: Some("strategic_objective_ids".into()),
        derived_column: Some("is_derived_alignment".into()),
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityKind {
    type Err = VisibilityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        EntityKind::ALL
            .into_iter()
            .find(|k| k.collection() == wanted)
            .ok_or_else(|| VisibilityError::InvalidRequest(format!("unknown entity kind '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_schema_validates() {
        for kind in EntityKind::ALL {
            kind.schema()
                .validate()
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
        }
    }

    #[test]
    fn collection_names_are_unique_and_parse_back() {
        let names: HashSet<_> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        assert_eq!(names.len(), 20);
        for kind in EntityKind::ALL {
            assert_eq!(kind.collection().parse::<EntityKind>().unwrap(), kind);
        }
        assert_eq!("living-labs".parse::<EntityKind>().unwrap(), EntityKind::LivingLabs);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn financial_collections_require_exact_pagination() {
        assert!(EntityKind::Budgets.schema().strict_pagination);
        assert!(EntityKind::Contracts.schema().strict_pagination);
        assert!(!EntityKind::Events.schema().strict_pagination);
    }

    #[test]
    fn schemas_disagree_on_soft_delete() {
        assert!(matches!(EntityKind::Challenges.schema().soft_delete, SoftDelete::StrictFalse(_)));
        assert!(matches!(EntityKind::Pilots.schema().soft_delete, SoftDelete::NullOrFalse(_)));
        assert_eq!(EntityKind::LivingLabs.schema().soft_delete, SoftDelete::None);
    }

    #[test]
    fn status_filter_uses_collection_column() {
        assert_eq!(
            EntityKind::Pilots.status_filter(&["active"]).unwrap(),
            Filter::eq("stage", "active")
        );
        assert!(EntityKind::CaseStudies.status_filter(&["x"]).is_err());
    }
}
