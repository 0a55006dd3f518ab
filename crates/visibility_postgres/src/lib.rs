//! Postgres adapters for the visibility core ports.
//!
//! Each adapter wraps a `PgPool`. SQL is built at runtime with
//! `sqlx::QueryBuilder` and bound parameters.

pub mod lookup;
pub mod pool;
pub mod sql;
pub mod store;

pub use lookup::{PgReferenceLookup, PgScopeLookup, ReferenceTables};
pub use pool::{mask_database_url, DatabaseConfig};
pub use store::PgRowSource;
