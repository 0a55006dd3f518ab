//! Query-result cache keyed by collection, resolved policy and caller filters.
//!
//! Entries expire after the collection's TTL. Invalidation after writes is
//! the writer's job: call `invalidate_collection` (or `clear`).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::policy::VisibilityPolicy;
use crate::schema::EntityQuerySpec;
use crate::types::FetchResult;

/// `"{collection}:{sha256}"`. The prefix lets a whole collection be dropped
/// without knowing the digests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    fields: &'a [String],
    options: &'a crate::schema::FetchOptions,
    policy: String,
}

impl CacheKey {
    pub fn new(spec: &EntityQuerySpec, policy: &VisibilityPolicy) -> Self {
        let material = KeyMaterial {
            fields: &spec.fields,
            options: &spec.options,
            policy: policy.cache_fingerprint(),
        };
        // Serializing plain data structs into a Vec cannot fail.
        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        Self(format!("{}:{}", spec.schema.collection, hex::encode(digest)))
    }

    pub fn collection(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(c, _)| c)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CachedFetch {
    result: FetchResult,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl CachedFetch {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.to_std().map_or(false, |age| age >= self.ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
}

pub struct QueryCache {
    entries: RwLock<HashMap<CacheKey, CachedFetch>>,
    max_entries: usize,
    /// Overrides every per-collection TTL when set.
    ttl_override: Option<Duration>,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl_override: None,
        }
    }

    pub fn with_ttl_override(mut self, ttl: Option<Duration>) -> Self {
        self.ttl_override = ttl;
        self
    }

    pub async fn get(&self, key: &CacheKey) -> Option<FetchResult> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<FetchResult> {
        let entries = self.entries.read().await;
        let cached = entries.get(key)?;
        if cached.is_expired(now) {
            return None;
        }
        debug!(%key, "Cache hit");
        Some(cached.result.clone())
    }

    pub async fn insert(&self, key: CacheKey, result: FetchResult, ttl: Duration) {
        self.insert_at(key, result, ttl, Utc::now()).await
    }

    pub async fn insert_at(
        &self,
        key: CacheKey,
        result: FetchResult,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let ttl = self.ttl_override.unwrap_or(ttl);
        if ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedFetch {
                result,
                stored_at: now,
                ttl,
            },
        );

        if entries.len() > self.max_entries {
            entries.retain(|_, v| !v.is_expired(now));
        }
        // Still full: drop the oldest entries.
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, v)| v.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Drops every entry for `collection`. Returns how many were removed.
    pub async fn invalidate_collection(&self, collection: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| k.collection() != collection);
        let removed = before - entries.len();
        debug!(collection, removed, "Invalidated cached queries");
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("Query cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let total_entries = entries.len();
        let expired_entries = entries.values().filter(|v| v.is_expired(now)).count();
        CacheStats {
            total_entries,
            active_entries: total_entries - expired_entries,
            expired_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::policy::VisibilityLevel;
    use crate::schema::CollectionSchema;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn spec(collection: &str) -> EntityQuerySpec {
        EntityQuerySpec::new(CollectionSchema::new(collection))
    }

    fn sectoral(ids: &[Uuid]) -> VisibilityPolicy {
        VisibilityPolicy {
            level: VisibilityLevel::Sectoral,
            sector_ids: ids.iter().copied().collect::<BTreeSet<_>>(),
            ..VisibilityPolicy::public()
        }
    }

    fn result(n: usize) -> FetchResult {
        FetchResult {
            rows: vec![Default::default(); n],
            count: Some(n as u64),
            merged: false,
        }
    }

    #[test]
    fn key_depends_on_policy_parameters_and_filters() {
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let a = CacheKey::new(&spec("challenges"), &sectoral(&[s1]));
        let b = CacheKey::new(&spec("challenges"), &sectoral(&[s2]));
        let c = CacheKey::new(
            &spec("challenges").filter(Filter::eq("status", "open")),
            &sectoral(&[s1]),
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, CacheKey::new(&spec("challenges"), &sectoral(&[s1])));
        assert_eq!(a.collection(), "challenges");
    }

    #[test]
    fn global_callers_share_a_key() {
        let global = |is_national| VisibilityPolicy {
            level: VisibilityLevel::Global,
            has_full_visibility: true,
            is_national,
            ..VisibilityPolicy::public()
        };
        assert_eq!(
            CacheKey::new(&spec("events"), &global(true)),
            CacheKey::new(&spec("events"), &global(false))
        );
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = QueryCache::new(10);
        let key = CacheKey::new(&spec("events"), &VisibilityPolicy::public());
        let t0 = Utc::now();
        cache
            .insert_at(key.clone(), result(2), Duration::from_secs(60), t0)
            .await;
        assert!(cache.get_at(&key, t0 + chrono::Duration::seconds(59)).await.is_some());
        assert!(cache.get_at(&key, t0 + chrono::Duration::seconds(61)).await.is_none());
    }

    #[tokio::test]
    async fn invalidation_is_per_collection() {
        let cache = QueryCache::new(10);
        let policy = VisibilityPolicy::public();
        let ttl = Duration::from_secs(300);
        cache.insert(CacheKey::new(&spec("events"), &policy), result(1), ttl).await;
        cache
            .insert(
                CacheKey::new(&spec("events").with_count(), &policy),
                result(1),
                ttl,
            )
            .await;
        cache.insert(CacheKey::new(&spec("pilots"), &policy), result(1), ttl).await;

        assert_eq!(cache.invalidate_collection("events").await, 2);
        assert_eq!(cache.stats().await.total_entries, 1);
        cache.clear().await;
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn bounded_by_max_entries() {
        let cache = QueryCache::new(2);
        let t0 = Utc::now();
        let ttl = Duration::from_secs(300);
        for (i, collection) in ["a", "b", "c"].iter().enumerate() {
            let key = CacheKey::new(&spec(collection), &VisibilityPolicy::public());
            cache
                .insert_at(key, result(1), ttl, t0 + chrono::Duration::seconds(i as i64))
                .await;
        }
        assert_eq!(cache.stats().await.total_entries, 2);
        let first = CacheKey::new(&spec("a"), &VisibilityPolicy::public());
        assert!(cache.get_at(&first, t0).await.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = QueryCache::new(10).with_ttl_override(Some(Duration::ZERO));
        let key = CacheKey::new(&spec("events"), &VisibilityPolicy::public());
        cache.insert(key.clone(), result(1), Duration::from_secs(60)).await;
        assert!(cache.get(&key).await.is_none());
    }
}
