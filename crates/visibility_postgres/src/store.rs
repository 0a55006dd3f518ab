//! `RowSource` over a Postgres pool.
//!
//! Rows come back as JSON objects so arbitrary field selections decode
//! without per-collection row structs. All SQL is runtime-built; no
//! `sqlx::query!` macros, so no database is needed at compile time.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use visibility_core::error::StoreError;
use visibility_core::store::{RowSource, SelectRequest, SelectResponse, StoreCapabilities};
use visibility_core::types::Row;

use crate::sql::{count_rows, select_rows};

const UNDEFINED_TABLE: &str = "42P01";

pub struct PgRowSource {
    pool: PgPool,
    schema: Option<String>,
    capabilities: StoreCapabilities,
}

impl PgRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: None,
            capabilities: StoreCapabilities::default(),
        }
    }

    /// Qualify every collection with a schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Disable the combinable OR filter so geographic fetches split and
    /// merge client-side.
    pub fn force_client_merge(mut self, force: bool) -> Self {
        self.capabilities.disjunction = !force;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, request: &SelectRequest) -> Result<Vec<Row>, StoreError> {
        let mut qb = select_rows(self.schema.as_deref(), request)?;
        let values = qb
            .build_query_scalar::<serde_json::Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(&request.collection, e))?;
        values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(StoreError::Decode(format!(
                    "expected a JSON object row from '{}', got {other}",
                    request.collection
                ))),
            })
            .collect()
    }

    async fn fetch_count(&self, request: &SelectRequest) -> Result<u64, StoreError> {
        let mut qb = count_rows(self.schema.as_deref(), request)?;
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(&request.collection, e))?;
        Ok(count.max(0) as u64)
    }
}

fn store_error(collection: &str, e: sqlx::Error) -> StoreError {
    let undefined = e
        .as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNDEFINED_TABLE);
    if undefined {
        StoreError::UnknownCollection(collection.to_string())
    } else {
        StoreError::Internal(anyhow!(e))
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError> {
        debug!(
            collection = %request.collection,
            clauses = request.clauses.len(),
            count = request.count,
            "Executing select"
        );
        if request.count {
            let (rows, count) = tokio::try_join!(self.fetch_rows(request), self.fetch_count(request))?;
            Ok(SelectResponse {
                rows,
                count: Some(count),
            })
        } else {
            Ok(SelectResponse {
                rows: self.fetch_rows(request).await?,
                count: None,
            })
        }
    }
}
