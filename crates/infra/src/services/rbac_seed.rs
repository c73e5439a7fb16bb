//! Idempotent seeding of the permission catalogue, system roles and the
//! bootstrap administrator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use medstock_auth::{
    AuthProvider, CORE_PERMISSIONS, CORE_ROLES, NewUser, Role, RoleName, User, normalize_email,
};
use medstock_core::{DomainError, RoleId, UserId};

use crate::error::ServiceResult;
use crate::store::{Database, StoreTx};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacSeedSummary {
    pub permissions: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    /// Users whose primary role was missing from their role links.
    pub links_backfilled: usize,
}

/// Upsert [`CORE_PERMISSIONS`] and [`CORE_ROLES`], re-sync each system role's
/// permission links and make sure every user's primary role is also linked.
#[instrument(skip(db), err)]
pub async fn seed_rbac<D: Database>(db: &D) -> ServiceResult<RbacSeedSummary> {
    let mut tx = db.begin().await?;
    let summary = seed_rbac_in(&mut tx).await?;
    tx.commit().await?;
    info!(
        permissions = summary.permissions,
        roles_created = summary.roles_created,
        roles_updated = summary.roles_updated,
        links_backfilled = summary.links_backfilled,
        "RBAC seeded"
    );
    Ok(summary)
}

pub async fn seed_rbac_in<T: StoreTx>(tx: &mut T) -> ServiceResult<RbacSeedSummary> {
    let mut summary = RbacSeedSummary::default();
    let now = Utc::now();

    for permission in &CORE_PERMISSIONS {
        tx.save_permission(permission).await?;
        summary.permissions += 1;
    }

    for seed in &CORE_ROLES {
        let role = match tx.find_role_by_name(seed.name).await? {
            Some(mut role) => {
                role.description = Some(seed.description.to_string());
                role.is_system = true;
                role.is_active = true;
                summary.roles_updated += 1;
                role
            }
            None => {
                summary.roles_created += 1;
                Role {
                    id: RoleId::new(),
                    name: RoleName::new(seed.name)?,
                    description: Some(seed.description.to_string()),
                    is_system: true,
                    is_active: true,
                    created_at: now,
                }
            }
        };
        tx.save_role(&role).await?;
        tx.set_role_permissions(role.id, seed.permissions).await?;
    }

    for user in tx.list_users().await? {
        let Some(primary) = user.primary_role_id else {
            continue;
        };
        let mut linked = tx.user_role_ids(user.id).await?;
        if !linked.contains(&primary) {
            linked.insert(0, primary);
            tx.set_user_roles(user.id, &linked).await?;
            summary.links_backfilled += 1;
        }
    }

    Ok(summary)
}

/// Make sure `email` exists as an active superuser holding the ADMIN role.
#[instrument(skip(db), err)]
pub async fn ensure_admin_user<D: Database>(db: &D, email: &str) -> ServiceResult<User> {
    let mut tx = db.begin().await?;
    let user = ensure_admin_user_in(&mut tx, email).await?;
    tx.commit().await?;
    info!(user_id = %user.id, "admin user ensured");
    Ok(user)
}

pub async fn ensure_admin_user_in<T: StoreTx>(tx: &mut T, email: &str) -> ServiceResult<User> {
    tx.lock_user_admin().await?;

    let admin_role = tx
        .find_role_by_name(RoleName::ADMIN.as_str())
        .await?
        .ok_or_else(|| DomainError::not_found("Role not found: ADMIN"))?;

    let email = normalize_email(email)?;
    let now = Utc::now();
    let mut user = match tx.find_user_by_email(&email).await? {
        Some(user) => user,
        None => User::register(
            UserId::new(),
            NewUser {
                email,
                full_name: Some("System Administrator".to_string()),
                auth_provider: AuthProvider::Local,
                external_subject: None,
                organization_slug: None,
                is_active: true,
                is_superuser: true,
                role_ids: Vec::new(),
            },
            now,
        )?,
    };
    user.is_active = true;
    user.is_superuser = true;
    user.primary_role_id = Some(admin_role.id);
    user.updated_at = now;
    tx.save_user(&user).await?;

    let mut linked = tx.user_role_ids(user.id).await?;
    if !linked.contains(&admin_role.id) {
        linked.insert(0, admin_role.id);
        tx.set_user_roles(user.id, &linked).await?;
    }
    Ok(user)
}
