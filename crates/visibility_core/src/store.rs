//! Row source port — the backing-store boundary.
//!
//! Implemented by `visibility_postgres` and by the in-memory store in
//! `crate::memory`. The compiler depends only on this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::filter::Clause;
use crate::types::{Row, SortSpec, Window};

/// What the store can express natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreCapabilities {
    /// Supports `Clause::AnyOf` in a single query.
    pub disjunction: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self { disjunction: true }
    }
}

/// One backing-store query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub collection: String,
    /// Empty selects every column.
    pub fields: Vec<String>,
    /// Conjunction of clauses.
    pub clauses: Vec<Clause>,
    pub sort: Vec<SortSpec>,
    pub window: Option<Window>,
    /// Also report the exact number of rows matching `clauses`.
    pub count: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectResponse {
    pub rows: Vec<Row>,
    pub count: Option<u64>,
}

#[async_trait]
pub trait RowSource: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError>;
}
