//! Visibility policy — pure mapping from caller flags and scope to one of
//! four precedence-ordered levels.
//!
//! Precedence: global > sectoral > geographic > public. Exactly one level
//! applies. `has_full_visibility` is set only for global and is the
//! compiler's fast path.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::caller::CallerContext;
use crate::scope::VisibilityScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityLevel {
    Global,
    Sectoral,
    Geographic,
    Public,
}

impl VisibilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityLevel::Global => "global",
            VisibilityLevel::Sectoral => "sectoral",
            VisibilityLevel::Geographic => "geographic",
            VisibilityLevel::Public => "public",
        }
    }
}

impl fmt::Display for VisibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityPolicy {
    pub level: VisibilityLevel,
    pub has_full_visibility: bool,
    pub is_national: bool,
    pub sector_ids: BTreeSet<Uuid>,
    pub home_jurisdiction_id: Option<Uuid>,
    pub national_jurisdiction_ids: BTreeSet<Uuid>,
}

impl VisibilityPolicy {
    pub fn derive(
        caller: &CallerContext,
        scope: Option<&VisibilityScope>,
        national_jurisdiction_ids: &BTreeSet<Uuid>,
    ) -> Self {
        let is_national = scope.is_some_and(|s| s.is_national);
        let sector_ids = scope.map(|s| s.sector_ids.clone()).unwrap_or_default();
        let home_jurisdiction_id = scope.and_then(|s| s.home_jurisdiction_id);

        let level = if caller.is_admin()
            || caller.can_view_all_jurisdictions()
            || caller.can_view_all_sectors()
        {
            VisibilityLevel::Global
        } else if caller.is_national_reviewer() || is_national {
            VisibilityLevel::Sectoral
        } else if home_jurisdiction_id.is_some() {
            VisibilityLevel::Geographic
        } else {
            VisibilityLevel::Public
        };

        Self {
            level,
            has_full_visibility: level == VisibilityLevel::Global,
            is_national,
            sector_ids,
            home_jurisdiction_id,
            national_jurisdiction_ids: national_jurisdiction_ids.clone(),
        }
    }

    /// The narrowest policy; used when nothing about the caller is known.
    pub fn public() -> Self {
        Self {
            level: VisibilityLevel::Public,
            has_full_visibility: false,
            is_national: false,
            sector_ids: BTreeSet::new(),
            home_jurisdiction_id: None,
            national_jurisdiction_ids: BTreeSet::new(),
        }
    }

    /// Stable rendering of exactly the parameters that influence compilation.
    /// Two policies with the same fingerprint compile identically for every
    /// collection. Follows the compiler's dispatch: `has_full_visibility`
    /// decides global, and a global level without it compiles as public.
    pub fn cache_fingerprint(&self) -> String {
        if self.has_full_visibility {
            return VisibilityLevel::Global.to_string();
        }
        match self.level {
            VisibilityLevel::Global | VisibilityLevel::Public => {
                VisibilityLevel::Public.to_string()
            }
            VisibilityLevel::Sectoral => format!("sectoral:{}", join_ids(&self.sector_ids)),
            VisibilityLevel::Geographic => format!(
                "geographic:{}:{}",
                self.home_jurisdiction_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                join_ids(&self.national_jurisdiction_ids)
            ),
        }
    }
}

fn join_ids(ids: &BTreeSet<Uuid>) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",")
}
