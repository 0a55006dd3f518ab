use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
/// Oversight across one or more sectors in every jurisdiction.
pub const ROLE_NATIONAL_REVIEWER: &str = "national_reviewer";

pub const PERM_VIEW_ALL_JURISDICTIONS: &str = "visibility_all_jurisdictions";
pub const PERM_VIEW_ALL_SECTORS: &str = "visibility_all_sectors";

/// Identity plus role/permission flags for one request.
///
/// Produced by the permission resolver and passed explicitly into the scope
/// resolver and policy. There is no ambient or thread-local caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerContext {
    pub caller_id: Option<Uuid>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(caller_id: Uuid, roles: Vec<String>) -> Self {
        Self {
            caller_id: Some(caller_id),
            roles,
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    pub fn is_national_reviewer(&self) -> bool {
        self.has_role(ROLE_NATIONAL_REVIEWER)
    }

    pub fn can_view_all_jurisdictions(&self) -> bool {
        self.has_permission(PERM_VIEW_ALL_JURISDICTIONS)
    }

    pub fn can_view_all_sectors(&self) -> bool {
        self.has_permission(PERM_VIEW_ALL_SECTORS)
    }
}
