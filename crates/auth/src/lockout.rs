use medstock_core::{DomainError, DomainResult};

use crate::access::AccessProfile;

/// What is about to happen to a user who may hold user-management access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutAction {
    Deactivate,
    ReassignRoles,
    RevokeSuperuser,
}

impl LockoutAction {
    fn message(self) -> &'static str {
        match self {
            Self::Deactivate => "Cannot deactivate the last active administrator",
            Self::ReassignRoles => "Cannot remove access from the last active administrator",
            Self::RevokeSuperuser => {
                "Cannot revoke superuser from the last active administrator"
            }
        }
    }
}

/// Refuse a change that would leave no active user able to manage users.
///
/// `before` / `after` are the target's access before and after the change;
/// `active_managers` counts active user managers before the change,
/// the target included.
pub fn guard_last_manager(
    action: LockoutAction,
    before: &AccessProfile,
    after: &AccessProfile,
    active_managers: usize,
) -> DomainResult<()> {
    let loses_access = before.can_manage_users() && !after.can_manage_users();
    if loses_access && active_managers <= 1 {
        return Err(DomainError::forbidden(action.message()));
    }
    Ok(())
}
