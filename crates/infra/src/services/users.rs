//! User administration and the permission gate.
//!
//! Every change that can take user-management access away from someone runs
//! under the user-admin lock and passes through the last-manager guard, so two
//! concurrent demotions cannot each see the other as the remaining manager.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{info, instrument, warn};

use medstock_auth::{
    AccessProfile, AuthProvider, CommandAuthorization, ExternalIdentity, LockoutAction, NewUser,
    UpdateUser, User, authorize_command, guard_last_manager, normalize_email, plan_role_assignment, resolve_access,
};
use medstock_core::{DomainError, RoleId, UserId};

use crate::error::ServiceResult;
use crate::store::{AccessRepo, Database, StoreResult, StoreTx};

#[derive(Clone)]
pub struct UserAdminService<D> {
    db: D,
}

impl<D: Database> UserAdminService<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    #[instrument(skip(self, cmd), fields(email = %cmd.email, roles = cmd.role_ids.len()), err)]
    pub async fn create_user(&self, cmd: NewUser) -> ServiceResult<AccessProfile> {
        let mut tx = self.db.begin().await?;
        let profile = create_user_in(&mut tx, cmd).await?;
        tx.commit().await?;
        info!(user_id = %profile.user_id, "user created");
        Ok(profile)
    }

    #[instrument(skip(self, cmd), err)]
    pub async fn update_user(&self, user_id: UserId, cmd: UpdateUser) -> ServiceResult<User> {
        let mut tx = self.db.begin().await?;
        let user = update_user_in(&mut tx, user_id, cmd).await?;
        tx.commit().await?;
        info!(is_active = user.is_active, is_superuser = user.is_superuser, "user updated");
        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_user(&self, user_id: UserId) -> ServiceResult<User> {
        let mut tx = self.db.begin().await?;
        let user = deactivate_user_in(&mut tx, user_id).await?;
        tx.commit().await?;
        info!("user deactivated");
        Ok(user)
    }

    #[instrument(skip(self, role_ids), fields(roles = role_ids.len()), err)]
    pub async fn assign_roles(
        &self,
        user_id: UserId,
        role_ids: Vec<RoleId>,
    ) -> ServiceResult<AccessProfile> {
        let mut tx = self.db.begin().await?;
        let profile = assign_roles_in(&mut tx, user_id, &role_ids).await?;
        tx.commit().await?;
        info!(permissions = profile.permissions.len(), "roles assigned");
        Ok(profile)
    }

    /// Create or refresh the shadow account of a tenant user and give it the
    /// local counterpart of its tenant role.
    #[instrument(skip(self, identity), fields(role = %identity.role), err)]
    pub async fn sync_external_user(
        &self,
        identity: &ExternalIdentity,
    ) -> ServiceResult<AccessProfile> {
        let mut tx = self.db.begin().await?;
        let profile = sync_external_user_in(&mut tx, identity).await?;
        tx.commit().await?;
        info!(user_id = %profile.user_id, "external user synced");
        Ok(profile)
    }

    pub async fn user_access(&self, user_id: UserId) -> ServiceResult<AccessProfile> {
        let mut tx = self.db.begin().await?;
        let user = user_in(&mut tx, user_id).await?;
        let profile = current_access(&mut tx, &user).await?;
        tx.rollback().await?;
        Ok(profile)
    }

    pub async fn list_users(&self) -> ServiceResult<Vec<User>> {
        let mut tx = self.db.begin().await?;
        let users = tx.list_users().await?;
        tx.rollback().await?;
        Ok(users)
    }

    /// Permission gate run before a gated command. Returns the caller's
    /// resolved access on success.
    #[instrument(skip(self, command), err)]
    pub async fn authorize<C>(&self, actor: UserId, command: &C) -> ServiceResult<AccessProfile>
    where
        C: CommandAuthorization + Sync + ?Sized,
    {
        let mut tx = self.db.begin().await?;
        let Some(user) = tx.get_user(actor).await? else {
            warn!("unknown actor refused");
            return Err(DomainError::forbidden("Unknown user").into());
        };
        let profile = current_access(&mut tx, &user).await?;
        tx.rollback().await?;

        if let Err(err) = authorize_command(&profile, command) {
            warn!(reason = %err, "permission check failed");
            return Err(err.into());
        }
        Ok(profile)
    }
}

pub async fn create_user_in<T: StoreTx>(tx: &mut T, cmd: NewUser) -> ServiceResult<AccessProfile> {
    tx.lock_user_admin().await?;

    let email = normalize_email(&cmd.email)?;
    if tx.find_user_by_email(&email).await?.is_some() {
        return Err(DomainError::conflict("Email already exists").into());
    }

    let requested = cmd.role_ids.clone();
    let mut user = User::register(UserId::new(), cmd, Utc::now())?;
    let assignment = plan_role_assignment(None, &requested, &existing_roles(tx, &requested).await?)?;
    user.primary_role_id = assignment.primary_role_id;

    tx.save_user(&user).await?;
    tx.set_user_roles(user.id, &assignment.role_ids).await?;
    Ok(access_with(tx, &user, &assignment.role_ids).await?)
}

pub async fn update_user_in<T: StoreTx>(
    tx: &mut T,
    user_id: UserId,
    cmd: UpdateUser,
) -> ServiceResult<User> {
    tx.lock_user_admin().await?;
    let user = user_in(tx, user_id).await?;

    if let Some(raw) = cmd.email.as_deref() {
        let email = normalize_email(raw)?;
        if let Some(other) = tx.find_user_by_email(&email).await? {
            if other.id != user_id {
                return Err(DomainError::conflict("Email already exists").into());
            }
        }
    }

    let mut updated = user.clone();
    updated.apply_update(cmd, Utc::now())?;

    let action = if user.is_active && !updated.is_active {
        LockoutAction::Deactivate
    } else {
        LockoutAction::RevokeSuperuser
    };
    let linked = tx.user_role_ids(user_id).await?;
    guard_change(tx, action, &user, &updated, &linked, &linked).await?;

    tx.save_user(&updated).await?;
    Ok(updated)
}

pub async fn deactivate_user_in<T: StoreTx>(tx: &mut T, user_id: UserId) -> ServiceResult<User> {
    tx.lock_user_admin().await?;
    let user = user_in(tx, user_id).await?;

    let mut updated = user.clone();
    updated.deactivate(Utc::now());

    let linked = tx.user_role_ids(user_id).await?;
    guard_change(tx, LockoutAction::Deactivate, &user, &updated, &linked, &linked).await?;

    tx.save_user(&updated).await?;
    Ok(updated)
}

/// Replace the user's role links with `role_ids`.
pub async fn assign_roles_in<T: StoreTx>(
    tx: &mut T,
    user_id: UserId,
    role_ids: &[RoleId],
) -> ServiceResult<AccessProfile> {
    tx.lock_user_admin().await?;
    let user = user_in(tx, user_id).await?;

    let assignment =
        plan_role_assignment(user.primary_role_id, role_ids, &existing_roles(tx, role_ids).await?)?;

    let mut updated = user.clone();
    updated.primary_role_id = assignment.primary_role_id;
    updated.updated_at = Utc::now();

    let linked_before = tx.user_role_ids(user_id).await?;
    guard_change(
        tx,
        LockoutAction::ReassignRoles,
        &user,
        &updated,
        &linked_before,
        &assignment.role_ids,
    )
    .await?;

    tx.save_user(&updated).await?;
    tx.set_user_roles(user_id, &assignment.role_ids).await?;
    Ok(access_with(tx, &updated, &assignment.role_ids).await?)
}

pub async fn sync_external_user_in<T: StoreTx>(
    tx: &mut T,
    identity: &ExternalIdentity,
) -> ServiceResult<AccessProfile> {
    let shadow = identity.to_shadow()?;
    tx.lock_user_admin().await?;

    let role = tx
        .find_role_by_name(shadow.local_role)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Role not found: {}", shadow.local_role)))?;

    let email_owner = tx.find_user_by_email(&shadow.email).await?;
    let by_subject = tx.find_user_by_external_subject(&shadow.external_subject).await?;
    let (before, linked_before) = match by_subject {
        Some(user) => {
            if email_owner.as_ref().is_some_and(|owner| owner.id != user.id) {
                return Err(DomainError::conflict("Email already exists").into());
            }
            let linked = tx.user_role_ids(user.id).await?;
            (user, linked)
        }
        None => match email_owner {
            Some(owner) if owner.auth_provider == AuthProvider::Local => {
                warn!(user_id = %owner.id, "external identity collides with a local account");
                return Err(
                    DomainError::conflict("A local user already exists with this email").into(),
                );
            }
            Some(owner) => {
                let linked = tx.user_role_ids(owner.id).await?;
                (owner, linked)
            }
            None => {
                let user = User::register(
                    UserId::new(),
                    NewUser {
                        email: shadow.email.clone(),
                        full_name: Some(shadow.full_name.clone()),
                        auth_provider: AuthProvider::External,
                        external_subject: Some(shadow.external_subject.clone()),
                        organization_slug: Some(shadow.organization_slug.clone()),
                        is_active: true,
                        is_superuser: false,
                        role_ids: Vec::new(),
                    },
                    Utc::now(),
                )?;
                (user, Vec::new())
            }
        },
    };

    let mut updated = before.clone();
    updated.email = shadow.email;
    updated.full_name = Some(shadow.full_name);
    updated.auth_provider = AuthProvider::External;
    updated.external_subject = Some(shadow.external_subject);
    updated.organization_slug = Some(shadow.organization_slug);
    updated.is_active = true;
    updated.is_superuser = false;
    updated.updated_at = Utc::now();

    let assignment = plan_role_assignment(
        before.primary_role_id,
        &[role.id],
        &HashSet::from([role.id]),
    )?;
    updated.primary_role_id = assignment.primary_role_id;

    guard_change(
        tx,
        LockoutAction::ReassignRoles,
        &before,
        &updated,
        &linked_before,
        &assignment.role_ids,
    )
    .await?;

    tx.save_user(&updated).await?;
    tx.set_user_roles(updated.id, &assignment.role_ids).await?;
    Ok(access_with(tx, &updated, &assignment.role_ids).await?)
}

/// Refuse the change from `before` to `after` when it strips user-management
/// access from the last active user who has it.
async fn guard_change<T: StoreTx>(
    tx: &mut T,
    action: LockoutAction,
    before: &User,
    after: &User,
    linked_before: &[RoleId],
    linked_after: &[RoleId],
) -> ServiceResult<()> {
    let access_before = access_with(tx, before, linked_before).await?;
    let access_after = access_with(tx, after, linked_after).await?;
    if !access_before.can_manage_users() || access_after.can_manage_users() {
        return Ok(());
    }

    let managers = tx.active_user_manager_ids().await?.len();
    if let Err(err) = guard_last_manager(action, &access_before, &access_after, managers) {
        warn!(user_id = %before.id, ?action, "last user manager protected");
        return Err(err.into());
    }
    Ok(())
}

async fn user_in<T: AccessRepo>(tx: &mut T, user_id: UserId) -> ServiceResult<User> {
    Ok(tx
        .get_user(user_id)
        .await?
        .ok_or_else(|| DomainError::not_found("User not found"))?)
}

async fn existing_roles<T: AccessRepo>(
    tx: &mut T,
    role_ids: &[RoleId],
) -> StoreResult<HashSet<RoleId>> {
    Ok(tx.get_roles(role_ids).await?.into_iter().map(|r| r.id).collect())
}

pub(crate) async fn current_access<T: AccessRepo>(
    tx: &mut T,
    user: &User,
) -> StoreResult<AccessProfile> {
    let linked = tx.user_role_ids(user.id).await?;
    access_with(tx, user, &linked).await
}

/// Access `user` would have with `linked` as its role links.
async fn access_with<T: AccessRepo>(
    tx: &mut T,
    user: &User,
    linked: &[RoleId],
) -> StoreResult<AccessProfile> {
    let primary = match user.primary_role_id {
        Some(id) => tx.get_role(id).await?,
        None => None,
    };
    let assigned = tx.get_roles(linked).await?;

    let mut role_ids: Vec<RoleId> = user.primary_role_id.into_iter().collect();
    role_ids.extend(linked.iter().copied().filter(|id| Some(*id) != user.primary_role_id));
    let grants = tx.role_permissions(&role_ids).await?;

    Ok(resolve_access(user, primary.as_ref(), &assigned, &grants))
}
