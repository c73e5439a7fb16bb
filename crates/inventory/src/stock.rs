//! Stock summary and the pure rules for in/out/adjust movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{BatchId, DomainError, DomainResult, ProductId, Quantity, WarehouseId};

use crate::ledger::TxnType;

/// The unit stock is held at: one balance per (warehouse, product, batch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
}

impl StockKey {
    pub fn new(warehouse_id: WarehouseId, product_id: ProductId, batch_id: BatchId) -> Self {
        Self {
            warehouse_id,
            product_id,
            batch_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "warehouse={} product={} batch={}",
            self.warehouse_id, self.product_id, self.batch_id
        )
    }
}

/// Materialized running sum of the ledger for one [`StockKey`].
///
/// Invariant: `qty_on_hand` equals the sum of ledger `qty` for the same key and
/// is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub qty_on_hand: Quantity,
    pub updated_at: DateTime<Utc>,
}

impl StockSummary {
    pub fn empty(key: &StockKey, now: DateTime<Utc>) -> Self {
        Self {
            warehouse_id: key.warehouse_id,
            product_id: key.product_id,
            batch_id: key.batch_id,
            qty_on_hand: Quantity::ZERO,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id, self.product_id, self.batch_id)
    }
}

/// A requested change to one stock balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "qty", rename_all = "lowercase")]
pub enum Movement {
    /// Receive a positive quantity.
    In(Quantity),
    /// Issue a positive quantity.
    Out(Quantity),
    /// Correct the balance by a non-zero signed delta.
    Adjust(Quantity),
}

/// Outcome of applying a [`Movement`] to the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub txn_type: TxnType,
    /// Signed quantity to write to the ledger.
    pub signed_qty: Quantity,
    pub new_balance: Quantity,
    /// No summary row existed yet; the store must insert one.
    pub creates_summary: bool,
}

impl Movement {
    /// Quantity checks that need no stored state.
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Movement::In(qty) | Movement::Out(qty) if !qty.is_positive() => Err(
                DomainError::invalid_quantity("Quantity must be greater than zero"),
            ),
            Movement::Adjust(delta) if delta.is_zero() => Err(DomainError::invalid_quantity(
                "Adjustment delta cannot be zero",
            )),
            _ => Ok(()),
        }
    }

    pub fn txn_type(&self) -> TxnType {
        match self {
            Movement::In(_) => TxnType::In,
            Movement::Out(_) => TxnType::Out,
            Movement::Adjust(_) => TxnType::Adjust,
        }
    }

    pub fn signed_qty(&self) -> Quantity {
        match self {
            Movement::In(qty) => *qty,
            Movement::Out(qty) => -*qty,
            Movement::Adjust(delta) => *delta,
        }
    }

    /// Apply the movement to the locked summary row for its key (`None` when
    /// the key has never held stock).
    pub fn apply(&self, current: Option<&StockSummary>) -> DomainResult<Posting> {
        self.validate()?;

        let on_hand = current.map(|s| s.qty_on_hand).unwrap_or(Quantity::ZERO);
        match self {
            Movement::In(_) => {}
            Movement::Out(qty) => {
                if on_hand < *qty {
                    return Err(DomainError::insufficient_stock(format!(
                        "Insufficient stock for stock out: available {on_hand}, requested {qty}"
                    )));
                }
            }
            Movement::Adjust(delta) => {
                if current.is_none() && delta.is_negative() {
                    return Err(DomainError::insufficient_stock(
                        "Insufficient stock for negative adjustment",
                    ));
                }
                if (on_hand + *delta).is_negative() {
                    return Err(DomainError::insufficient_stock(format!(
                        "Adjustment would result in negative stock: on hand {on_hand}, delta {delta}"
                    )));
                }
            }
        }

        let signed_qty = self.signed_qty();
        Ok(Posting {
            txn_type: self.txn_type(),
            signed_qty,
            new_balance: on_hand + signed_qty,
            creates_summary: current.is_none(),
        })
    }
}
