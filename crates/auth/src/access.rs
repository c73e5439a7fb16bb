//! Effective access resolution.
//!
//! A user's effective roles are the primary role followed by the roles linked
//! through the user-role join table, de-duplicated by id. Effective
//! permissions are the union of the permission codes granted to those roles.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use medstock_core::{RoleId, UserId};

use crate::permissions::Permission;
use crate::roles::{Role, RolePermission};
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
}

impl From<&Role> for RoleSummary {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.as_str().to_string(),
            description: role.description.clone(),
        }
    }
}

/// Resolved access of one user; the principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProfile {
    pub user_id: UserId,
    pub is_active: bool,
    pub is_superuser: bool,
    pub primary_role_id: Option<RoleId>,
    /// Primary role first.
    pub roles: Vec<RoleSummary>,
    /// Sorted, de-duplicated permission codes.
    pub permissions: BTreeSet<Permission>,
}

impl AccessProfile {
    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Active and either superuser or holder of `user:manage`.
    pub fn can_manage_users(&self) -> bool {
        self.is_active && (self.is_superuser || self.has_permission(&Permission::USER_MANAGE))
    }

    pub fn permission_codes(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.as_str().to_string()).collect()
    }
}

/// Resolve a user's effective roles and permissions.
///
/// `primary` is the user's primary role record (if any), `assigned` the roles
/// linked through the join table in link order, and `grants` the
/// role-permission rows for any of those roles. Inactive roles grant nothing.
pub fn resolve_access(
    user: &User,
    primary: Option<&Role>,
    assigned: &[Role],
    grants: &[RolePermission],
) -> AccessProfile {
    let mut seen: HashSet<RoleId> = HashSet::new();
    let roles: Vec<&Role> = primary
        .into_iter()
        .chain(assigned.iter())
        .filter(|role| role.is_active)
        .filter(|role| seen.insert(role.id))
        .collect();

    let permissions = grants
        .iter()
        .filter(|g| seen.contains(&g.role_id))
        .map(|g| g.permission.clone())
        .collect();

    AccessProfile {
        user_id: user.id,
        is_active: user.is_active,
        is_superuser: user.is_superuser,
        primary_role_id: user.primary_role_id,
        roles: roles.into_iter().map(RoleSummary::from).collect(),
        permissions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleName;
    use crate::user::{AuthProvider, NewUser};
    use chrono::Utc;

    fn role(name: &'static str) -> Role {
        Role {
            id: RoleId::new(),
            name: RoleName::new(name).unwrap(),
            description: None,
            is_system: true,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn user() -> User {
        User::register(
            UserId::new(),
            NewUser {
                email: "store@pharma.example".to_string(),
                full_name: None,
                auth_provider: AuthProvider::Local,
                external_subject: None,
                organization_slug: None,
                is_active: true,
                is_superuser: false,
                role_ids: Vec::new(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn grant(role: &Role, permission: Permission) -> RolePermission {
        RolePermission {
            role_id: role.id,
            permission,
        }
    }

    #[test]
    fn primary_role_comes_first_and_duplicates_collapse() {
        let store = role("STORE_EXECUTIVE");
        let viewer = role("VIEW_ONLY");
        let mut u = user();
        u.primary_role_id = Some(store.id);

        let profile = resolve_access(&u, Some(&store), &[viewer.clone(), store.clone()], &[]);
        let names: Vec<&str> = profile.roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["STORE_EXECUTIVE", "VIEW_ONLY"]);
    }

    #[test]
    fn permissions_are_the_sorted_union_of_role_grants() {
        let store = role("STORE_EXECUTIVE");
        let viewer = role("VIEW_ONLY");
        let unrelated = role("PURCHASE_MANAGER");
        let grants = vec![
            grant(&store, Permission::GRN_POST),
            grant(&store, Permission::INVENTORY_VIEW),
            grant(&viewer, Permission::INVENTORY_VIEW),
            grant(&viewer, Permission::REPORTS_VIEW),
            grant(&unrelated, Permission::PURCHASE_APPROVE),
        ];

        let profile = resolve_access(&user(), None, &[store, viewer], &grants);
        assert_eq!(
            profile.permission_codes(),
            ["grn:post", "inventory:view", "reports:view"]
        );
        assert!(!profile.has_permission(&Permission::PURCHASE_APPROVE));
    }

    #[test]
    fn inactive_roles_grant_nothing() {
        let mut admin = role("ADMIN");
        admin.is_active = false;
        let grants = vec![grant(&admin, Permission::USER_MANAGE)];

        let profile = resolve_access(&user(), None, &[admin], &grants);
        assert!(profile.roles.is_empty());
        assert!(profile.permissions.is_empty());
    }

    #[test]
    fn managers_are_active_superusers_or_user_managers() {
        let admin = role("ADMIN");
        let grants = vec![grant(&admin, Permission::USER_MANAGE)];

        let mut u = user();
        assert!(!resolve_access(&u, None, &[], &grants).can_manage_users());
        assert!(resolve_access(&u, None, &[admin.clone()], &grants).can_manage_users());

        u.is_superuser = true;
        assert!(resolve_access(&u, None, &[], &grants).can_manage_users());

        u.is_active = false;
        assert!(!resolve_access(&u, None, &[admin], &grants).can_manage_users());
    }
}
