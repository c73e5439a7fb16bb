use std::collections::HashSet;

use medstock_core::{DomainError, DomainResult, RoleId};

/// Outcome of a role assignment: the full replacement set of linked roles
/// and the resulting primary role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub role_ids: Vec<RoleId>,
    pub primary_role_id: Option<RoleId>,
}

/// Plan the replacement of a user's role links.
///
/// Requested ids are de-duplicated keeping first-seen order. An empty request
/// clears every link and the primary role. Unknown ids fail with `NOT_FOUND`
/// listing each one. The current primary survives when it is still in the
/// set; otherwise the first requested role becomes primary.
pub fn plan_role_assignment(
    current_primary: Option<RoleId>,
    requested: &[RoleId],
    existing: &HashSet<RoleId>,
) -> DomainResult<RoleAssignment> {
    let mut seen = HashSet::new();
    let role_ids: Vec<RoleId> = requested
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let missing: Vec<String> = role_ids
        .iter()
        .filter(|id| !existing.contains(id))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(DomainError::not_found(format!(
            "Role not found: {}",
            missing.join(", ")
        )));
    }

    let primary_role_id = match current_primary {
        Some(primary) if role_ids.contains(&primary) => Some(primary),
        _ => role_ids.first().copied(),
    };

    Ok(RoleAssignment {
        role_ids,
        primary_role_id,
    })
}
