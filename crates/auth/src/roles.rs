use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Entity, RoleId};

use crate::permissions::Permission;

/// Role name (e.g. `"PURCHASE_MANAGER"`); unique across roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub const ADMIN: RoleName = RoleName(Cow::Borrowed("ADMIN"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> DomainResult<Self> {
        let name: Cow<'static, str> = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        if trimmed.len() > 50 {
            return Err(DomainError::validation("role name cannot exceed 50 characters"));
        }
        if trimmed.len() == name.len() {
            Ok(Self(name))
        } else {
            Ok(Self(Cow::Owned(trimmed.to_string())))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role record. Permissions are linked through the role-permission join
/// table, not stored on the role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub description: Option<String>,
    /// Seeded by the system; kept in sync on every seed run.
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Row of the role-permission join table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission: Permission,
}

/// Seed definition of a system role.
#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: &'static [Permission],
}

const OPERATIONS: [Permission; 7] = [
    Permission::PURCHASE_CREATE,
    Permission::PURCHASE_APPROVE,
    Permission::GRN_CREATE,
    Permission::GRN_POST,
    Permission::INVENTORY_VIEW,
    Permission::INVENTORY_ADJUST,
    Permission::REPORTS_VIEW,
];

const READ_ONLY: [Permission; 2] = [Permission::INVENTORY_VIEW, Permission::REPORTS_VIEW];

/// System roles and the permissions each one grants.
pub const CORE_ROLES: [RoleSeed; 7] = [
    RoleSeed {
        name: "ADMIN",
        description: "Full platform administration access.",
        permissions: &crate::permissions::CORE_PERMISSIONS,
    },
    RoleSeed {
        name: "ORG_ADMIN",
        description: "Organisation administrator for day-to-day operations.",
        permissions: &[
            Permission::PURCHASE_CREATE,
            Permission::PURCHASE_APPROVE,
            Permission::GRN_CREATE,
            Permission::GRN_POST,
            Permission::INVENTORY_VIEW,
            Permission::INVENTORY_ADJUST,
            Permission::REPORTS_VIEW,
            Permission::MASTERS_MANAGE,
        ],
    },
    RoleSeed {
        name: "PURCHASE_MANAGER",
        description: "Can manage purchase orders and approve receipts.",
        permissions: &OPERATIONS,
    },
    RoleSeed {
        name: "READ_WRITE",
        description: "Can execute operational transactions without approval authority.",
        permissions: &[
            Permission::PURCHASE_CREATE,
            Permission::GRN_CREATE,
            Permission::GRN_POST,
            Permission::INVENTORY_VIEW,
            Permission::REPORTS_VIEW,
        ],
    },
    RoleSeed {
        name: "SERVICE_SUPPORT",
        description: "Read-only support access.",
        permissions: &READ_ONLY,
    },
    RoleSeed {
        name: "STORE_EXECUTIVE",
        description: "Can create and post GRNs and view inventory.",
        permissions: &[
            Permission::GRN_CREATE,
            Permission::GRN_POST,
            Permission::INVENTORY_VIEW,
            Permission::REPORTS_VIEW,
        ],
    },
    RoleSeed {
        name: "VIEW_ONLY",
        description: "Can access read-only reports and stock visibility.",
        permissions: &READ_ONLY,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::CORE_PERMISSIONS;

    #[test]
    fn admin_grants_the_whole_catalogue() {
        let admin = CORE_ROLES.iter().find(|r| r.name == "ADMIN").unwrap();
        assert_eq!(admin.permissions.len(), CORE_PERMISSIONS.len());
    }

    #[test]
    fn only_admin_can_manage_users() {
        for seed in CORE_ROLES.iter().filter(|r| r.name != "ADMIN") {
            assert!(
                !seed.permissions.contains(&Permission::USER_MANAGE),
                "{} should not grant user:manage",
                seed.name
            );
        }
    }

    #[test]
    fn seeded_role_names_are_valid_and_unique() {
        let mut names: Vec<&str> = CORE_ROLES.iter().map(|r| r.name).collect();
        for name in &names {
            RoleName::new(*name).unwrap();
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CORE_ROLES.len());
    }

    #[test]
    fn role_name_is_trimmed() {
        assert_eq!(RoleName::new(" AUDITOR ".to_string()).unwrap().as_str(), "AUDITOR");
        assert!(RoleName::new("   ").is_err());
    }
}
