use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Entity, WarehouseId};

/// Warehouse master record. Stock is partitioned per warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    /// Unique short code (e.g. `"BLR-01"`).
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWarehouse {
    pub code: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

impl Warehouse {
    pub fn create(id: WarehouseId, cmd: NewWarehouse, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            code: ensure_code(&cmd.code)?,
            name: ensure_name(&cmd.name)?,
            address: cmd.address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, cmd: UpdateWarehouse, now: DateTime<Utc>) -> DomainResult<()> {
        let code = cmd.code.as_deref().map(ensure_code).transpose()?;
        let name = cmd.name.as_deref().map(ensure_name).transpose()?;

        if let Some(code) = code {
            self.code = code;
        }
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(address) = cmd.address {
            let address = address.trim().to_string();
            self.address = (!address.is_empty()).then_some(address);
        }
        if let Some(active) = cmd.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Soft delete. Deactivating an inactive warehouse is a no-op.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.updated_at = now;
        }
    }
}

fn ensure_code(code: &str) -> DomainResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation("code cannot be empty"));
    }
    if code.chars().count() > 50 {
        return Err(DomainError::validation("code cannot exceed 50 characters"));
    }
    Ok(code.to_string())
}

fn ensure_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Ok(name.to_string())
}
