//! Visibility engine: role-, sector- and jurisdiction-scoped reads over
//! inconsistently shaped collections.
//!
//! The scoping logic lives in `visibility_core`; the Postgres adapters in
//! `visibility_postgres` (feature `database`). This crate adds
//! configuration, the engine facade with its query cache, and the entity
//! catalogue.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use visibility_engine::{EngineConfig, EntityKind, VisibilityEngine};
//! use visibility_core::memory::{MemoryStore, StaticReferenceLookup, StaticScopeLookup};
//! use visibility_core::CallerContext;
//!
//! # async fn demo() -> visibility_core::Result<()> {
//! let engine = VisibilityEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticScopeLookup::default()),
//!     Arc::new(StaticReferenceLookup::default()),
//!     EngineConfig::default(),
//! );
//! let events = engine
//!     .fetch_for(&CallerContext::anonymous(), &EntityKind::Events.query())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod entities;

#[cfg(feature = "database")]
pub mod database;

pub use config::EngineConfig;
pub use engine::VisibilityEngine;
pub use entities::EntityKind;
