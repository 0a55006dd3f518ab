//! Named queries used by list views. Each is configuration on top of
//! `EntityKind::query()`; visibility is applied by the compiler.
//!
//! Time-relative queries take `now` explicitly so they compile
//! deterministically.

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use visibility_core::error::Result;
use visibility_core::filter::Filter;
use visibility_core::schema::EntityQuerySpec;
use visibility_core::types::{Pagination, SortSpec};

use super::EntityKind;

/// Published events that have not started yet, soonest first.
pub fn upcoming_events(now: DateTime<Utc>, limit: usize) -> EntityQuerySpec {
    EntityKind::Events
        .query()
        .filter(Filter::gte("start_date", now))
        .sort(SortSpec::asc("start_date"))
        .paginate(Pagination::limit(limit))
}

/// Events overlapping `[from, to]`.
pub fn events_between(from: DateTime<Utc>, to: DateTime<Utc>) -> EntityQuerySpec {
    EntityKind::Events
        .query()
        .filter(Filter::lte("start_date", to))
        .filter(Filter::gte("end_date", from))
}

/// Calls still accepting submissions at `now`.
pub fn open_rd_calls(now: DateTime<Utc>) -> Result<EntityQuerySpec> {
    Ok(EntityKind::RdCalls
        .query()
        .filter(EntityKind::RdCalls.status_filter(&["open"])?)
        .filter(Filter::gt("deadline", now)))
}

pub fn active_pilots(page: usize, page_size: usize) -> Result<EntityQuerySpec> {
    Ok(EntityKind::Pilots
        .query()
        .filter(EntityKind::Pilots.status_filter(&["active", "scaling"])?)
        .paginate(Pagination::page(page, page_size))
        .with_count())
}

/// Challenges attached to one program.
pub fn program_challenges(program_id: Uuid) -> EntityQuerySpec {
    EntityKind::Challenges
        .query()
        .filter(Filter::eq("program_id", program_id))
}

pub fn pilots_for_solution(solution_id: Uuid) -> EntityQuerySpec {
    EntityKind::Pilots
        .query()
        .filter(Filter::eq("solution_id", solution_id))
}

/// Budget lines for one fiscal year, paged with an exact count.
pub fn budgets_for_year(fiscal_year: i32, page: usize, page_size: usize) -> EntityQuerySpec {
    EntityKind::Budgets
        .query()
        .filter(Filter::eq("fiscal_year", fiscal_year))
        .sort(SortSpec::desc("amount"))
        .paginate(Pagination::page(page, page_size))
        .with_count()
}

pub fn current_year_budgets(now: DateTime<Utc>, page: usize, page_size: usize) -> EntityQuerySpec {
    budgets_for_year(now.year(), page, page_size)
}

/// Active contracts ending within `[now, until]`.
pub fn contracts_expiring(now: DateTime<Utc>, until: DateTime<Utc>) -> Result<EntityQuerySpec> {
    Ok(EntityKind::Contracts
        .query()
        .filter(EntityKind::Contracts.status_filter(&["active"])?)
        .filter(Filter::between("end_date", now, until))
        .sort(SortSpec::asc("end_date")))
}

pub fn expert_assignments_for(expert_id: Uuid) -> EntityQuerySpec {
    EntityKind::ExpertAssignments
        .query()
        .filter(Filter::eq("expert_id", expert_id))
}

/// Knowledge documents carrying any of `tags`.
pub fn documents_tagged(tags: &[&str], limit: usize) -> EntityQuerySpec {
    EntityKind::KnowledgeDocuments
        .query()
        .filter(Filter::overlaps("tags", tags.iter().copied()))
        .paginate(Pagination::limit(limit))
}

pub fn organizations_in_sectors(sector_ids: &[Uuid]) -> EntityQuerySpec {
    EntityKind::Organizations
        .query()
        .filter(Filter::is_in("sector_id", sector_ids.iter().copied()))
}
