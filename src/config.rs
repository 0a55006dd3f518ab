//! Engine configuration. Loaded once at startup from environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use visibility_core::scope::DEFAULT_NATIONAL_REGION_CODE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Code of the reference region whose members are national jurisdictions.
    pub national_region_code: String,
    pub cache_enabled: bool,
    /// Replaces every per-collection TTL when set.
    pub cache_ttl_override: Option<Duration>,
    pub cache_max_entries: usize,
    /// Always split geographic fetches into own/national sub-queries.
    pub force_client_merge: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            national_region_code: DEFAULT_NATIONAL_REGION_CODE.to_string(),
            cache_enabled: true,
            cache_ttl_override: None,
            cache_max_entries: 1000,
            force_client_merge: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable keys keep defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match get(key) {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
            None => default,
        };
        Self {
            national_region_code: get("VISIBILITY_NATIONAL_REGION_CODE")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.national_region_code),
            cache_enabled: flag("VISIBILITY_CACHE_ENABLED", defaults.cache_enabled),
            cache_ttl_override: get("VISIBILITY_CACHE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            cache_max_entries: get("VISIBILITY_CACHE_MAX_ENTRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_max_entries),
            force_client_merge: flag("VISIBILITY_FORCE_CLIENT_MERGE", defaults.force_client_merge),
        }
    }

    /// No caching; every fetch hits the store.
    pub fn uncached() -> Self {
        Self {
            cache_enabled: false,
            ..Self::default()
        }
    }
}
