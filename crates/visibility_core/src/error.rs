use thiserror::Error;

/// Failure reported by a backing-store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unsupported filter: {0}")]
    Unsupported(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failure reported by a scope or reference lookup port.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed lookup result: {0}")]
    Malformed(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum VisibilityError {
    /// Absorbed by the scope resolver; the caller collapses to the public level.
    #[error("scope lookup failed: {0}")]
    ScopeLookupFailed(#[source] LookupError),

    /// Absorbed by the scope resolver; the national jurisdiction set becomes empty.
    #[error("reference lookup failed: {0}")]
    ReferenceLookupFailed(#[source] LookupError),

    /// A backing-store query failed. Always propagated to the caller.
    #[error("query against '{collection}' failed (filters: [{}]): {source}", .filters.join(", "))]
    QueryFailed {
        collection: String,
        filters: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("visibility scope for the current caller is still loading")]
    ScopeNotReady,
}

impl VisibilityError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ScopeLookupFailed(_) | Self::ReferenceLookupFailed(_) => 503,
            Self::QueryFailed { .. } => 502,
            Self::InvalidRequest(_) => 400,
            Self::ScopeNotReady => 409,
        }
    }

    /// True for failures the resolver degrades into a narrower scope instead of surfacing.
    pub fn is_absorbed(&self) -> bool {
        matches!(
            self,
            Self::ScopeLookupFailed(_) | Self::ReferenceLookupFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VisibilityError>;
