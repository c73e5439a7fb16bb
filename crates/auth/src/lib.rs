//! `medstock-auth`: pure role/permission model and authorization boundary.
//!
//! This crate is decoupled from transport and storage: it resolves a user's
//! effective roles and permissions from explicit role and join-table records,
//! gates operations on a required permission code, and guards against locking
//! every administrator out.

pub mod access;
pub mod assignment;
pub mod authorize;
pub mod external;
pub mod lockout;
pub mod permissions;
pub mod roles;
pub mod user;

pub use access::{AccessProfile, RoleSummary, resolve_access};
pub use assignment::{RoleAssignment, plan_role_assignment};
pub use authorize::{AuthzError, CommandAuthorization, GatedOperation, authorize, authorize_command};
pub use external::{ExternalIdentity, ShadowProfile, local_role_for};
pub use lockout::{LockoutAction, guard_last_manager};
pub use permissions::{CORE_PERMISSIONS, Permission};
pub use roles::{CORE_ROLES, Role, RoleName, RolePermission, RoleSeed};
pub use user::{AuthProvider, NewUser, UpdateUser, User, normalize_email};
