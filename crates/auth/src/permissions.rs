use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission code, `module:action` (e.g. `"purchase:approve"`).
///
/// Checks are exact string membership; there is no wildcard. Superusers
/// bypass the check instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const PURCHASE_CREATE: Permission = Permission::from_static("purchase:create");
    pub const PURCHASE_APPROVE: Permission = Permission::from_static("purchase:approve");
    pub const GRN_CREATE: Permission = Permission::from_static("grn:create");
    pub const GRN_POST: Permission = Permission::from_static("grn:post");
    pub const INVENTORY_VIEW: Permission = Permission::from_static("inventory:view");
    pub const INVENTORY_ADJUST: Permission = Permission::from_static("inventory:adjust");
    pub const REPORTS_VIEW: Permission = Permission::from_static("reports:view");
    pub const USER_MANAGE: Permission = Permission::from_static("user:manage");
    pub const MASTERS_MANAGE: Permission = Permission::from_static("masters:manage");

    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the `:`; the whole code when there is none.
    pub fn module(&self) -> &str {
        self.as_str().split_once(':').map_or(self.as_str(), |(m, _)| m)
    }

    /// Part after the `:`; empty when there is none.
    pub fn action(&self) -> &str {
        self.as_str().split_once(':').map_or("", |(_, a)| a)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The permission catalogue seeded into every installation.
pub const CORE_PERMISSIONS: [Permission; 9] = [
    Permission::PURCHASE_CREATE,
    Permission::PURCHASE_APPROVE,
    Permission::GRN_CREATE,
    Permission::GRN_POST,
    Permission::INVENTORY_VIEW,
    Permission::INVENTORY_ADJUST,
    Permission::REPORTS_VIEW,
    Permission::USER_MANAGE,
    Permission::MASTERS_MANAGE,
];
