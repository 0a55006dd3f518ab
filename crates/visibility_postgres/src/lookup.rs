//! Scope and reference lookups over Postgres.

use std::collections::BTreeSet;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use visibility_core::error::LookupError;
use visibility_core::schema::check_identifier;
use visibility_core::scope::{ReferenceLookup, ScopeLookup, VisibilityScope};

use crate::sql::quote_ident;

fn lookup_error(e: sqlx::Error) -> LookupError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LookupError::Unavailable(e.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LookupError::Malformed(e.to_string())
        }
        other => LookupError::Internal(anyhow!(other)),
    }
}

fn checked(name: &str) -> Result<String, LookupError> {
    check_identifier(name)
        .map(|_| quote_ident(name))
        .map_err(|e| LookupError::Malformed(e.to_string()))
}

// ── PgScopeLookup ─────────────────────────────────────────────

/// Calls a set-returning function
/// `(caller_id uuid) -> (is_national bool, sector_ids uuid[], home_jurisdiction_id uuid)`.
pub struct PgScopeLookup {
    pool: PgPool,
    function: String,
}

impl PgScopeLookup {
    pub const DEFAULT_FUNCTION: &'static str = "get_user_visibility_scope";

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            function: Self::DEFAULT_FUNCTION.to_string(),
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = function.into();
        self
    }
}

#[async_trait]
impl ScopeLookup for PgScopeLookup {
    async fn lookup_scope(&self, caller_id: Uuid) -> Result<Option<VisibilityScope>, LookupError> {
        let sql = format!(
            "SELECT is_national, sector_ids, home_jurisdiction_id FROM {}($1) LIMIT 1",
            checked(&self.function)?
        );
        let row = sqlx::query_as::<_, (Option<bool>, Option<Vec<Uuid>>, Option<Uuid>)>(&sql)
            .bind(caller_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_error)?;

        Ok(row.map(|(is_national, sector_ids, home)| VisibilityScope {
            is_national: is_national.unwrap_or(false),
            sector_ids: sector_ids.unwrap_or_default().into_iter().collect(),
            home_jurisdiction_id: home,
        }))
    }
}

// ── PgReferenceLookup ─────────────────────────────────────────

/// Where regions and their member jurisdictions live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub region_table: String,
    pub region_id_column: String,
    pub region_code_column: String,
    pub jurisdiction_table: String,
    pub jurisdiction_id_column: String,
    pub jurisdiction_region_column: String,
}

impl Default for ReferenceTables {
    fn default() -> Self {
        Self {
            region_table: "regions".into(),
            region_id_column: "id".into(),
            region_code_column: "code".into(),
            jurisdiction_table: "municipalities".into(),
            jurisdiction_id_column: "id".into(),
            jurisdiction_region_column: "region_id".into(),
        }
    }
}

impl ReferenceTables {
    fn region_id_sql(&self) -> Result<String, LookupError> {
        Ok(format!(
            "SELECT {id} FROM {table} WHERE {code} = $1 LIMIT 1",
            id = checked(&self.region_id_column)?,
            table = checked(&self.region_table)?,
            code = checked(&self.region_code_column)?,
        ))
    }

    fn members_sql(&self) -> Result<String, LookupError> {
        Ok(format!(
            "SELECT j.{jid} FROM {jt} j JOIN {rt} r ON j.{jregion} = r.{rid} WHERE r.{code} = $1",
            jid = checked(&self.jurisdiction_id_column)?,
            jt = checked(&self.jurisdiction_table)?,
            rt = checked(&self.region_table)?,
            jregion = checked(&self.jurisdiction_region_column)?,
            rid = checked(&self.region_id_column)?,
            code = checked(&self.region_code_column)?,
        ))
    }
}

pub struct PgReferenceLookup {
    pool: PgPool,
    tables: ReferenceTables,
}

impl PgReferenceLookup {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: ReferenceTables::default(),
        }
    }

    pub fn with_tables(mut self, tables: ReferenceTables) -> Self {
        self.tables = tables;
        self
    }
}

#[async_trait]
impl ReferenceLookup for PgReferenceLookup {
    async fn region_id(&self, region_code: &str) -> Result<Option<Uuid>, LookupError> {
        sqlx::query_scalar::<_, Uuid>(&self.tables.region_id_sql()?)
            .bind(region_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_error)
    }

    async fn region_jurisdiction_ids(&self, region_code: &str) -> Result<BTreeSet<Uuid>, LookupError> {
        let ids = sqlx::query_scalar::<_, Uuid>(&self.tables.members_sql()?)
            .bind(region_code)
            .fetch_all(&self.pool)
            .await
            .map_err(lookup_error)?;
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reference_sql() {
        let t = ReferenceTables::default();
        assert_eq!(
            t.region_id_sql().unwrap(),
            "SELECT \"id\" FROM \"regions\" WHERE \"code\" = $1 LIMIT 1"
        );
        assert_eq!(
            t.members_sql().unwrap(),
            "SELECT j.\"id\" FROM \"municipalities\" j JOIN \"regions\" r \
             ON j.\"region_id\" = r.\"id\" WHERE r.\"code\" = $1"
        );
    }

    #[test]
    fn invalid_table_name_is_malformed() {
        let t = ReferenceTables {
            region_table: "regions; drop".into(),
            ..Default::default()
        };
        assert!(matches!(t.region_id_sql(), Err(LookupError::Malformed(_))));
    }
}
