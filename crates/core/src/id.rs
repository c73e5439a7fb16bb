//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtypes {
    ($($(#[$meta:meta])* $t:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $t(Uuid);

            impl $t {
                /// Create a new identifier.
                ///
                /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests
                /// for determinism.
                pub fn new() -> Self {
                    Self(Uuid::now_v7())
                }

                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }
            }

            impl Default for $t {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl core::fmt::Display for $t {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    core::fmt::Display::fmt(&self.0, f)
                }
            }

            impl From<Uuid> for $t {
                fn from(value: Uuid) -> Self {
                    Self(value)
                }
            }

            impl From<$t> for Uuid {
                fn from(value: $t) -> Self {
                    value.0
                }
            }

            impl FromStr for $t {
                type Err = DomainError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    let uuid = Uuid::from_str(s).map_err(|e| {
                        DomainError::invalid_id(format!("{}: {}", stringify!($t), e))
                    })?;
                    Ok(Self(uuid))
                }
            }
        )+
    };
}

uuid_newtypes!(
    /// Identifier of a user (actor identity; `created_by` / `posted_by`).
    UserId,
    /// Identifier of a role.
    RoleId,
    /// Identifier of a party (supplier, customer, manufacturer...).
    PartyId,
    /// Identifier of a warehouse.
    WarehouseId,
    /// Identifier of a product.
    ProductId,
    /// Identifier of an expiry-tracked batch of a product.
    BatchId,
    /// Identifier of a purchase order.
    PurchaseOrderId,
    /// Identifier of a purchase order line.
    PurchaseOrderLineId,
    /// Identifier of a goods receipt note.
    GrnId,
    /// Identifier of a goods receipt note line.
    GrnLineId,
);
