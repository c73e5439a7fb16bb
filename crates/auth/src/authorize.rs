use serde::{Deserialize, Serialize};
use thiserror::Error;

use medstock_core::DomainError;

use crate::access::AccessProfile;
use crate::permissions::Permission;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("user account is inactive")]
    Inactive,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

impl From<AuthzError> for DomainError {
    fn from(err: AuthzError) -> Self {
        DomainError::forbidden(err.to_string())
    }
}

/// Command-side authorization contract (checked at the operation boundary).
///
/// The gate runs before the operation; the operation itself does not
/// re-check the actor's permissions.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal for one permission.
///
/// - No IO
/// - Superusers bypass the permission check
/// - Inactive accounts are always refused
pub fn authorize(principal: &AccessProfile, required: &Permission) -> Result<(), AuthzError> {
    if !principal.is_active {
        return Err(AuthzError::Inactive);
    }
    if principal.is_superuser || principal.has_permission(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Authorize a principal for every permission a command declares.
pub fn authorize_command<C>(principal: &AccessProfile, command: &C) -> Result<(), AuthzError>
where
    C: CommandAuthorization + ?Sized,
{
    command
        .required_permissions()
        .iter()
        .try_for_each(|p| authorize(principal, p))
}

// ─────────────────────────────────────────────────────────────────────────────
// Gated operations
// ─────────────────────────────────────────────────────────────────────────────

/// Operations that sit behind a permission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatedOperation {
    CreatePurchaseOrder,
    ApprovePurchaseOrder,
    CancelPurchaseOrder,
    CreateGrn,
    PostGrn,
    CancelGrn,
    ViewInventory,
    AdjustStock,
    ViewReports,
    ManageUsers,
    ManageMasters,
}

impl GatedOperation {
    pub fn required_permission(self) -> &'static Permission {
        static PURCHASE_CREATE: Permission = Permission::PURCHASE_CREATE;
        static PURCHASE_APPROVE: Permission = Permission::PURCHASE_APPROVE;
        static GRN_CREATE: Permission = Permission::GRN_CREATE;
        static GRN_POST: Permission = Permission::GRN_POST;
        static INVENTORY_VIEW: Permission = Permission::INVENTORY_VIEW;
        static INVENTORY_ADJUST: Permission = Permission::INVENTORY_ADJUST;
        static REPORTS_VIEW: Permission = Permission::REPORTS_VIEW;
        static USER_MANAGE: Permission = Permission::USER_MANAGE;
        static MASTERS_MANAGE: Permission = Permission::MASTERS_MANAGE;
        match self {
            Self::CreatePurchaseOrder | Self::CancelPurchaseOrder => &PURCHASE_CREATE,
            Self::ApprovePurchaseOrder => &PURCHASE_APPROVE,
            Self::CreateGrn | Self::CancelGrn => &GRN_CREATE,
            Self::PostGrn => &GRN_POST,
            Self::ViewInventory => &INVENTORY_VIEW,
            Self::AdjustStock => &INVENTORY_ADJUST,
            Self::ViewReports => &REPORTS_VIEW,
            Self::ManageUsers => &USER_MANAGE,
            Self::ManageMasters => &MASTERS_MANAGE,
        }
    }
}

impl CommandAuthorization for GatedOperation {
    fn required_permissions(&self) -> &[Permission] {
        core::slice::from_ref(self.required_permission())
    }
}
