//! `VisibilityEngine` — wires the scope resolver, a row source and the query
//! cache behind one entry point.
//!
//! Two ways to use it:
//! * one-shot: `fetch_for(caller, spec)` resolves scope for this call and
//!   fetches; suited to request/response handlers.
//! * tracked: `bind_caller(id)` resolves and holds scope for a session, and
//!   `fetch(caller, spec)` refuses with `ScopeNotReady` until that scope has
//!   fully settled for the same caller.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use visibility_core::cache::{CacheKey, CacheStats, QueryCache};
use visibility_core::caller::CallerContext;
use visibility_core::compiler::{self, CompiledQuery};
use visibility_core::error::{Result, VisibilityError};
use visibility_core::policy::VisibilityPolicy;
use visibility_core::schema::{EntityQuerySpec, MergeMode};
use visibility_core::scope::{ReferenceLookup, ScopeLookup, ScopeResolver, ScopeSnapshot};
use visibility_core::store::RowSource;
use visibility_core::strategic::{with_strategic, StrategicFilters};
use visibility_core::types::FetchResult;

use crate::config::EngineConfig;

pub struct VisibilityEngine {
    resolver: ScopeResolver,
    source: Arc<dyn RowSource>,
    cache: Option<QueryCache>,
    config: EngineConfig,
}

impl VisibilityEngine {
    pub fn new(
        source: Arc<dyn RowSource>,
        scopes: Arc<dyn ScopeLookup>,
        references: Arc<dyn ReferenceLookup>,
        config: EngineConfig,
    ) -> Self {
        let resolver =
            ScopeResolver::new(scopes, references).with_region_code(config.national_region_code.clone());
        let cache = config.cache_enabled.then(|| {
            QueryCache::new(config.cache_max_entries).with_ttl_override(config.cache_ttl_override)
        });
        info!(
            region = %config.national_region_code,
            cache = config.cache_enabled,
            force_client_merge = config.force_client_merge,
            "Visibility engine ready"
        );
        Self {
            resolver,
            source,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    // ── Policy ────────────────────────────────────────────────

    /// Resolve scope for `caller` and derive its policy. Lookup failures
    /// narrow the policy; they are never returned.
    pub async fn policy_for(&self, caller: &CallerContext) -> VisibilityPolicy {
        let resolution = self.resolver.resolve(caller.caller_id).await;
        let policy = resolution.policy(caller);
        debug!(
            caller = ?caller.caller_id,
            level = %policy.level,
            degraded = resolution.is_degraded(),
            "Resolved visibility policy"
        );
        policy
    }

    fn prepare(&self, spec: &EntityQuerySpec) -> EntityQuerySpec {
        let mut spec = spec.clone();
        if self.config.force_client_merge {
            spec.options.merge_mode = MergeMode::ForceSplit;
        }
        spec
    }

    pub fn compile(&self, spec: &EntityQuerySpec, policy: &VisibilityPolicy) -> Result<CompiledQuery> {
        compiler::compile(&self.prepare(spec), policy, self.source.capabilities())
    }

    pub fn cache_key(&self, spec: &EntityQuerySpec, policy: &VisibilityPolicy) -> CacheKey {
        CacheKey::new(&self.prepare(spec), policy)
    }

    // ── Fetch ─────────────────────────────────────────────────

    /// Fetch under an already-derived policy, through the cache.
    pub async fn fetch_with_policy(
        &self,
        spec: &EntityQuerySpec,
        policy: &VisibilityPolicy,
    ) -> Result<FetchResult> {
        let spec = self.prepare(spec);
        let key = self.cache.as_ref().map(|_| CacheKey::new(&spec, policy));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).await {
                return Ok(hit);
            }
        }

        let compiled = compiler::compile(&spec, policy, self.source.capabilities())?;
        debug!(
            collection = %spec.collection(),
            level = %compiled.level(),
            plan = compiled.kind(),
            "Compiled visibility query"
        );
        let result = compiler::execute(self.source.as_ref(), &compiled).await?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, result.clone(), spec.schema.cache_ttl).await;
        }
        Ok(result)
    }

    /// One-shot: resolve scope for this call, then fetch.
    pub async fn fetch_for(&self, caller: &CallerContext, spec: &EntityQuerySpec) -> Result<FetchResult> {
        let policy = self.policy_for(caller).await;
        self.fetch_with_policy(spec, &policy).await
    }

    /// One-shot fetch with strategic-plan alignment filters.
    pub async fn fetch_strategic(
        &self,
        caller: &CallerContext,
        spec: &EntityQuerySpec,
        strategic: &StrategicFilters,
    ) -> Result<FetchResult> {
        let spec = with_strategic(spec, strategic)?;
        self.fetch_for(caller, &spec).await
    }

    // ── Tracked caller ────────────────────────────────────────

    /// Switch the tracked caller and resolve its scope.
    pub async fn bind_caller(&self, caller_id: Option<Uuid>) -> ScopeSnapshot {
        self.resolver.track(caller_id).await
    }

    /// Drop the tracked caller; in-flight resolutions are discarded.
    pub async fn unbind(&self) {
        self.resolver.teardown().await;
    }

    /// The "enabled" gate: true once the tracked scope has fully settled.
    pub async fn is_ready(&self) -> bool {
        self.resolver.snapshot().await.is_ready()
    }

    /// Fetch for the tracked caller. Refuses while scope is loading or when
    /// `caller` is not the caller currently bound.
    pub async fn fetch(&self, caller: &CallerContext, spec: &EntityQuerySpec) -> Result<FetchResult> {
        let snapshot = self.resolver.snapshot().await;
        if snapshot.caller_id != caller.caller_id {
            return Err(VisibilityError::ScopeNotReady);
        }
        let policy = snapshot.policy(caller).ok_or(VisibilityError::ScopeNotReady)?;
        self.fetch_with_policy(spec, &policy).await
    }

    // ── Cache ─────────────────────────────────────────────────

    /// Call after writing to `collection`.
    pub async fn invalidate_collection(&self, collection: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.invalidate_collection(collection).await,
            None => 0,
        }
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }
}
