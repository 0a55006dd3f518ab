//! Scope resolver — loads a caller's visibility scope and the national
//! jurisdiction reference set.
//!
//! Lookups are fail-closed: any error is logged and replaced with the
//! narrowest result (no scope, empty national set). Tracked resolutions
//! carry a generation number; a result is committed only if its generation
//! is still current, so a slow lookup for a previous caller never
//! overwrites a newer one.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::caller::CallerContext;
use crate::error::{LookupError, VisibilityError};
use crate::policy::VisibilityPolicy;

pub const DEFAULT_NATIONAL_REGION_CODE: &str = "NATIONAL";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisibilityScope {
    pub is_national: bool,
    pub sector_ids: BTreeSet<Uuid>,
    pub home_jurisdiction_id: Option<Uuid>,
}

/// Server-side scope lookup keyed on caller id.
#[async_trait]
pub trait ScopeLookup: Send + Sync {
    /// `Ok(None)` when the caller has no scope record.
    async fn lookup_scope(&self, caller_id: Uuid)
        -> Result<Option<VisibilityScope>, LookupError>;
}

/// Fixed reference data: the nation-wide region and its jurisdictions.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn region_id(&self, region_code: &str) -> Result<Option<Uuid>, LookupError>;

    /// Jurisdictions belonging to the region with `region_code`.
    async fn region_jurisdiction_ids(
        &self,
        region_code: &str,
    ) -> Result<BTreeSet<Uuid>, LookupError>;
}

/// Result of a one-shot resolution.
#[derive(Debug, Default)]
pub struct ScopeResolution {
    pub caller_id: Option<Uuid>,
    pub scope: Option<VisibilityScope>,
    pub national_region_id: Option<Uuid>,
    pub national_jurisdiction_ids: BTreeSet<Uuid>,
    /// Absorbed failures. Each one narrowed the resolution.
    pub failures: Vec<VisibilityError>,
}

impl ScopeResolution {
    pub fn policy(&self, caller: &CallerContext) -> VisibilityPolicy {
        VisibilityPolicy::derive(caller, self.scope.as_ref(), &self.national_jurisdiction_ids)
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Observable state of the tracked caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub generation: u64,
    pub caller_id: Option<Uuid>,
    pub scope: Option<VisibilityScope>,
    pub national_region_id: Option<Uuid>,
    pub national_jurisdiction_ids: BTreeSet<Uuid>,
    pub scope_loading: bool,
    pub region_loading: bool,
    pub members_loading: bool,
    pub degraded: bool,
}

impl ScopeSnapshot {
    /// True while any sub-load of the current generation is pending.
    pub fn is_loading(&self) -> bool {
        self.scope_loading || self.region_loading || self.members_loading
    }

    /// Gate for dependent fetches: open once every sub-load has settled.
    pub fn is_ready(&self) -> bool {
        !self.is_loading()
    }

    pub fn policy(&self, caller: &CallerContext) -> Option<VisibilityPolicy> {
        self.is_ready().then(|| {
            VisibilityPolicy::derive(caller, self.scope.as_ref(), &self.national_jurisdiction_ids)
        })
    }
}

pub struct ScopeResolver {
    scopes: Arc<dyn ScopeLookup>,
    references: Arc<dyn ReferenceLookup>,
    national_region_code: String,
    state: RwLock<ScopeSnapshot>,
    region_cache: RwLock<Option<Uuid>>,
    members_cache: RwLock<Option<BTreeSet<Uuid>>>,
}

impl ScopeResolver {
    pub fn new(scopes: Arc<dyn ScopeLookup>, references: Arc<dyn ReferenceLookup>) -> Self {
        Self {
            scopes,
            references,
            national_region_code: DEFAULT_NATIONAL_REGION_CODE.to_string(),
            state: RwLock::new(ScopeSnapshot::default()),
            region_cache: RwLock::new(None),
            members_cache: RwLock::new(None),
        }
    }

    pub fn with_region_code(mut self, code: impl Into<String>) -> Self {
        self.national_region_code = code.into();
        self
    }

    pub fn national_region_code(&self) -> &str {
        &self.national_region_code
    }

    // ── One-shot ──────────────────────────────────────────────

    /// Resolve scope and reference data for `caller_id` without touching
    /// tracked state. The three lookups run concurrently.
    pub async fn resolve(&self, caller_id: Option<Uuid>) -> ScopeResolution {
        let (scope, region, members) = tokio::join!(
            self.load_scope(caller_id),
            self.load_region_id(),
            self.load_members()
        );

        let mut resolution = ScopeResolution {
            caller_id,
            ..Default::default()
        };
        match scope {
            Ok(s) => resolution.scope = s,
            Err(e) => resolution.failures.push(e),
        }
        match region {
            Ok(r) => resolution.national_region_id = r,
            Err(e) => resolution.failures.push(e),
        }
        match members {
            Ok(m) => resolution.national_jurisdiction_ids = m,
            Err(e) => resolution.failures.push(e),
        }
        resolution
    }

    // ── Tracked ───────────────────────────────────────────────

    /// Switch the tracked caller and resolve it. Each sub-load commits as
    /// it settles, guarded by the generation taken here.
    pub async fn track(&self, caller_id: Option<Uuid>) -> ScopeSnapshot {
        let generation = self.begin(caller_id).await;

        tokio::join!(
            async {
                let scope = self.load_scope(caller_id).await;
                self.commit(generation, |state| {
                    state.scope_loading = false;
                    match scope {
                        Ok(s) => state.scope = s,
                        Err(_) => state.degraded = true,
                    }
                })
                .await
            },
            async {
                let region = self.load_region_id().await;
                self.commit(generation, |state| {
                    state.region_loading = false;
                    match region {
                        Ok(r) => state.national_region_id = r,
                        Err(_) => state.degraded = true,
                    }
                })
                .await
            },
            async {
                let members = self.load_members().await;
                self.commit(generation, |state| {
                    state.members_loading = false;
                    match members {
                        Ok(m) => state.national_jurisdiction_ids = m,
                        Err(_) => state.degraded = true,
                    }
                })
                .await
            }
        );

        self.snapshot().await
    }

    /// Start a new generation for `caller_id` and mark its sub-loads pending.
    pub async fn begin(&self, caller_id: Option<Uuid>) -> u64 {
        let mut state = self.state.write().await;
        let generation = state.generation + 1;
        *state = ScopeSnapshot {
            generation,
            caller_id,
            scope_loading: caller_id.is_some(),
            region_loading: true,
            members_loading: true,
            ..Default::default()
        };
        generation
    }

    /// Apply `update` only if `generation` is still current.
    pub async fn commit<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut ScopeSnapshot),
    {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!(
                stale = generation,
                current = state.generation,
                "Discarding stale scope result"
            );
            return false;
        }
        update(&mut state);
        true
    }

    /// Invalidate any in-flight tracked resolution and clear state.
    pub async fn teardown(&self) {
        let mut state = self.state.write().await;
        let generation = state.generation + 1;
        *state = ScopeSnapshot {
            generation,
            ..Default::default()
        };
    }

    pub async fn snapshot(&self) -> ScopeSnapshot {
        self.state.read().await.clone()
    }

    /// Drop cached reference data; the next resolution reloads it.
    pub async fn invalidate_reference(&self) {
        *self.region_cache.write().await = None;
        *self.members_cache.write().await = None;
    }

    // ── Sub-loads ─────────────────────────────────────────────

    async fn load_scope(
        &self,
        caller_id: Option<Uuid>,
    ) -> Result<Option<VisibilityScope>, VisibilityError> {
        let Some(caller_id) = caller_id else {
            return Ok(None);
        };
        match self.scopes.lookup_scope(caller_id).await {
            Ok(scope) => {
                debug!(%caller_id, found = scope.is_some(), "Scope lookup completed");
                Ok(scope)
            }
            Err(e) => {
                warn!(%caller_id, error = %e, "Scope lookup failed, falling back to no scope");
                Err(VisibilityError::ScopeLookupFailed(e))
            }
        }
    }

    async fn load_region_id(&self) -> Result<Option<Uuid>, VisibilityError> {
        if let Some(id) = *self.region_cache.read().await {
            return Ok(Some(id));
        }
        match self.references.region_id(&self.national_region_code).await {
            Ok(id) => {
                if id.is_none() {
                    warn!(code = %self.national_region_code, "National region not found");
                }
                *self.region_cache.write().await = id;
                Ok(id)
            }
            Err(e) => {
                warn!(code = %self.national_region_code, error = %e, "National region lookup failed");
                Err(VisibilityError::ReferenceLookupFailed(e))
            }
        }
    }

    async fn load_members(&self) -> Result<BTreeSet<Uuid>, VisibilityError> {
        if let Some(ids) = self.members_cache.read().await.as_ref() {
            return Ok(ids.clone());
        }
        match self
            .references
            .region_jurisdiction_ids(&self.national_region_code)
            .await
        {
            Ok(ids) => {
                debug!(count = ids.len(), "Loaded national jurisdictions");
                *self.members_cache.write().await = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                warn!(
                    code = %self.national_region_code,
                    error = %e,
                    "National jurisdiction lookup failed, using empty set"
                );
                Err(VisibilityError::ReferenceLookupFailed(e))
            }
        }
    }
}
