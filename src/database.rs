//! Postgres-backed engine construction.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use visibility_postgres::{DatabaseConfig, PgReferenceLookup, PgRowSource, PgScopeLookup};

use crate::config::EngineConfig;
use crate::engine::VisibilityEngine;

impl VisibilityEngine {
    /// Engine over an existing pool.
    pub fn with_pool(pool: PgPool, config: EngineConfig) -> Self {
        let source = PgRowSource::new(pool.clone()).force_client_merge(config.force_client_merge);
        Self::new(
            Arc::new(source),
            Arc::new(PgScopeLookup::new(pool.clone())),
            Arc::new(PgReferenceLookup::new(pool)),
            config,
        )
    }

    /// Connect using `database` and build an engine from `config`.
    pub async fn connect(database: &DatabaseConfig, config: EngineConfig) -> anyhow::Result<Self> {
        let pool = database
            .connect()
            .await
            .context("connecting visibility engine to Postgres")?;
        Ok(Self::with_pool(pool, config))
    }
}
