//! Identities asserted by the tenant identity service.
//!
//! An external user is mirrored locally as a shadow account keyed by
//! `rbac:{organization}:{user_id}`; only tenant roles with a local
//! counterpart are let in.

use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult};

use crate::user::normalize_email;

/// Tenant role → local role name.
pub const EXTERNAL_ROLE_MAP: [(&str, &str); 4] = [
    ("ORG_ADMIN", "ORG_ADMIN"),
    ("READ_WRITE", "READ_WRITE"),
    ("SERVICE_SUPPORT", "SERVICE_SUPPORT"),
    ("VIEW_ONLY", "VIEW_ONLY"),
];

/// Claims of an authenticated tenant user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub organization: String,
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: String,
}

/// Identity after validation, ready to be written to a shadow account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowProfile {
    pub external_subject: String,
    pub organization_slug: String,
    pub email: String,
    pub full_name: String,
    pub local_role: &'static str,
}

pub fn local_role_for(external_role: &str) -> DomainResult<&'static str> {
    EXTERNAL_ROLE_MAP
        .iter()
        .find(|(external, _)| *external == external_role.trim())
        .map(|(_, local)| *local)
        .ok_or_else(|| DomainError::forbidden("Role is not allowed in ERP"))
}

impl ExternalIdentity {
    pub fn subject(&self) -> String {
        format!("rbac:{}:{}", self.organization.trim(), self.user_id.trim())
    }

    /// Map the role first, then check the claims are complete.
    pub fn to_shadow(&self) -> DomainResult<ShadowProfile> {
        let local_role = local_role_for(&self.role)?;

        let organization = self.organization.trim();
        let user_id = self.user_id.trim();
        if organization.is_empty() || user_id.is_empty() || self.email.trim().is_empty() {
            return Err(DomainError::validation(
                "identity is missing organization, user id or email",
            ));
        }
        let email = normalize_email(&self.email)?;

        Ok(ShadowProfile {
            external_subject: self.subject(),
            organization_slug: organization.to_string(),
            full_name: display_name(self.full_name.as_deref(), &email),
            email,
            local_role,
        })
    }
}

/// Given name, or one derived from the email's local part
/// (`asha.rao@x` → `Asha Rao`).
fn display_name(full_name: Option<&str>, email: &str) -> String {
    if let Some(name) = full_name.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let local = email.split('@').next().unwrap_or_default();
    let words: Vec<String> = local
        .split(['.', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Tenant User".to_string()
    } else {
        words.join(" ")
    }
}
