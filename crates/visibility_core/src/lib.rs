//! Visibility core: scope resolution, policy derivation, query compilation
//! and merge. No database driver; storage sits behind the `RowSource`,
//! `ScopeLookup` and `ReferenceLookup` ports.
//!
//! ## Flow
//! caller id -> `ScopeResolver` -> `VisibilityPolicy::derive`
//! -> `compiler::compile` -> `compiler::execute` (via a `RowSource`)
//!
//! ```rust,no_run
//! use visibility_core::{fetch_with_visibility, CollectionSchema, EntityQuerySpec, VisibilityPolicy};
//! use visibility_core::memory::MemoryStore;
//!
//! # async fn demo() -> visibility_core::Result<()> {
//! let store = MemoryStore::new();
//! let spec = EntityQuerySpec::new(CollectionSchema::new("events").published("is_published"));
//! let result = fetch_with_visibility(&store, &spec, &VisibilityPolicy::public()).await?;
//! assert!(result.rows.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod caller;
pub mod compiler;
pub mod error;
pub mod filter;
pub mod memory;
pub mod merge;
pub mod policy;
pub mod schema;
pub mod scope;
pub mod store;
pub mod strategic;
pub mod types;

pub use cache::{CacheKey, CacheStats, QueryCache};
pub use caller::CallerContext;
pub use compiler::{compile, execute, fetch_with_visibility, CompiledQuery, MergePlan, VisibilityRule};
pub use error::{LookupError, Result, StoreError, VisibilityError};
pub use filter::{Clause, Filter, RangeBound};
pub use policy::{VisibilityLevel, VisibilityPolicy};
pub use schema::{
    CollectionSchema, EntityQuerySpec, FetchOptions, MergeMode, SoftDelete, StrategicColumns,
};
pub use scope::{
    ReferenceLookup, ScopeLookup, ScopeResolution, ScopeResolver, ScopeSnapshot, VisibilityScope,
};
pub use store::{RowSource, SelectRequest, SelectResponse, StoreCapabilities};
pub use strategic::{compile_strategic, fetch_with_strategic_visibility, StrategicFilters};
pub use types::{
    FetchResult, PagedResult, Pagination, Row, SortDirection, SortSpec, TextOrder, Value, Window,
};
