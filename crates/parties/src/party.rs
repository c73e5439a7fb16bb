use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Entity, PartyId};

/// Role a party plays in the distribution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyType {
    Manufacturer,
    SuperStockist,
    Distributor,
    Hospital,
    Pharmacy,
    Retailer,
    Consumer,
}

impl PartyType {
    pub const ALL: [PartyType; 7] = [
        PartyType::Manufacturer,
        PartyType::SuperStockist,
        PartyType::Distributor,
        PartyType::Hospital,
        PartyType::Pharmacy,
        PartyType::Retailer,
        PartyType::Consumer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PartyType::Manufacturer => "MANUFACTURER",
            PartyType::SuperStockist => "SUPER_STOCKIST",
            PartyType::Distributor => "DISTRIBUTOR",
            PartyType::Hospital => "HOSPITAL",
            PartyType::Pharmacy => "PHARMACY",
            PartyType::Retailer => "RETAILER",
            PartyType::Consumer => "CONSUMER",
        }
    }
}

impl core::str::FromStr for PartyType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown party type: {s}")))
    }
}

/// Contact information for a party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

impl ContactInfo {
    fn validate(&self) -> DomainResult<()> {
        if let Some(email) = &self.email {
            let email = email.trim();
            if !email.is_empty() && !looks_like_email(email) {
                return Err(DomainError::validation(format!("invalid email: {email}")));
            }
        }
        if let Some(phone) = &self.phone {
            if phone.trim().len() > 30 {
                return Err(DomainError::validation("phone cannot exceed 30 characters"));
            }
        }
        Ok(())
    }

    /// Blank strings collapse to `None`.
    fn normalized(self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            phone: clean(self.phone),
            email: clean(self.email),
            address: clean(self.address),
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Party master record.
///
/// Referenced by purchase orders and GRNs as the supplier. Parties are never
/// deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub party_type: PartyType,
    pub contact: ContactInfo,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Party {
    type Id = PartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: create a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParty {
    pub name: String,
    pub party_type: PartyType,
    #[serde(default)]
    pub contact: ContactInfo,
}

/// Command: partial update. `None` keeps the existing value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateParty {
    pub name: Option<String>,
    pub party_type: Option<PartyType>,
    pub contact: Option<ContactInfo>,
    pub is_active: Option<bool>,
}

impl Party {
    pub fn register(id: PartyId, cmd: NewParty, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = ensure_name(&cmd.name)?;
        cmd.contact.validate()?;

        Ok(Self {
            id,
            name,
            party_type: cmd.party_type,
            contact: cmd.contact.normalized(),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, cmd: UpdateParty, now: DateTime<Utc>) -> DomainResult<()> {
        let name = match &cmd.name {
            Some(name) => ensure_name(name)?,
            None => self.name.clone(),
        };
        if let Some(contact) = &cmd.contact {
            contact.validate()?;
        }

        self.name = name;
        if let Some(party_type) = cmd.party_type {
            self.party_type = party_type;
        }
        if let Some(contact) = cmd.contact {
            self.contact = contact.normalized();
        }
        if let Some(active) = cmd.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Soft delete. Deactivating an inactive party is a no-op.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.updated_at = now;
        }
    }

    /// Whether this party may appear on new documents.
    pub fn can_transact(&self) -> bool {
        self.is_active
    }
}

fn ensure_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if trimmed.chars().count() > 255 {
        return Err(DomainError::validation("name cannot exceed 255 characters"));
    }
    Ok(trimmed.to_string())
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn any_non_blank_name_registers(name in "[A-Za-z][A-Za-z0-9 ]{0,40}") {
            let cmd = NewParty { name: name.clone(), party_type: PartyType::Pharmacy, contact: ContactInfo::default() };
            let party = Party::register(PartyId::new(), cmd, Utc::now()).unwrap();
            prop_assert_eq!(party.name, name.trim().to_string());
        }
    }
}
