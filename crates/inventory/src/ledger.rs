//! Append-only inventory ledger.
//!
//! A [`LedgerEntry`] is the system of record for every stock-quantity change.
//! Entries are never updated or deleted; the on-hand balance of any key is the
//! prefix sum of its entries ordered by `(created_at, id)`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{
    BatchId, DomainError, DomainResult, ProductId, Quantity, UnitCost, UserId, WarehouseId,
};

use crate::stock::StockKey;

/// Direction of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnType {
    In,
    Out,
    Adjust,
    Transfer,
}

impl TxnType {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnType::In => "IN",
            TxnType::Out => "OUT",
            TxnType::Adjust => "ADJUST",
            TxnType::Transfer => "TRANSFER",
        }
    }
}

impl core::str::FromStr for TxnType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(TxnType::In),
            "OUT" => Ok(TxnType::Out),
            "ADJUST" => Ok(TxnType::Adjust),
            "TRANSFER" => Ok(TxnType::Transfer),
            other => Err(DomainError::validation(format!("unknown txn type: {other}"))),
        }
    }
}

/// Business reason recorded on every ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryReason {
    PurchaseGrn,
    SalesDispatch,
    StockAdjustment,
    OpeningStock,
}

impl InventoryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InventoryReason::PurchaseGrn => "PURCHASE_GRN",
            InventoryReason::SalesDispatch => "SALES_DISPATCH",
            InventoryReason::StockAdjustment => "STOCK_ADJUSTMENT",
            InventoryReason::OpeningStock => "OPENING_STOCK",
        }
    }
}

impl core::str::FromStr for InventoryReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE_GRN" => Ok(InventoryReason::PurchaseGrn),
            "SALES_DISPATCH" => Ok(InventoryReason::SalesDispatch),
            "STOCK_ADJUSTMENT" => Ok(InventoryReason::StockAdjustment),
            "OPENING_STOCK" => Ok(InventoryReason::OpeningStock),
            other => Err(DomainError::validation(format!("unknown inventory reason: {other}"))),
        }
    }
}

/// Traceability reference of a ledger row, e.g. `("GRN", "GRN-0A1B2C3D4E")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockRef {
    pub ref_type: String,
    pub ref_id: String,
}

impl StockRef {
    pub fn new(ref_type: impl Into<String>, ref_id: impl Into<String>) -> DomainResult<Self> {
        let ref_type = ref_type.into().trim().to_string();
        let ref_id = ref_id.into().trim().to_string();
        if ref_type.is_empty() || ref_id.is_empty() {
            return Err(DomainError::validation("ref_type and ref_id must both be set"));
        }
        if ref_type.len() > 50 {
            return Err(DomainError::validation("ref_type cannot exceed 50 characters"));
        }
        if ref_id.len() > 100 {
            return Err(DomainError::validation("ref_id cannot exceed 100 characters"));
        }
        Ok(Self { ref_type, ref_id })
    }

    pub fn grn(grn_number: &str) -> DomainResult<Self> {
        Self::new("GRN", grn_number)
    }
}

/// A ledger row as built by the Stock Engine, before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub txn_type: TxnType,
    pub reason: InventoryReason,
    pub reference: Option<StockRef>,
    pub key: StockKey,
    /// Signed quantity: positive for IN, negative for OUT, either sign for ADJUST.
    pub qty: Quantity,
    pub unit_cost: Option<UnitCost>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// A committed ledger row. `id` is a store-assigned, strictly increasing sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub txn_type: TxnType,
    pub reason: InventoryReason,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub qty: Quantity,
    pub unit_cost: Option<UnitCost>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(id: i64, entry: NewLedgerEntry) -> Self {
        let (ref_type, ref_id) = match entry.reference {
            Some(r) => (Some(r.ref_type), Some(r.ref_id)),
            None => (None, None),
        };
        Self {
            id,
            txn_type: entry.txn_type,
            reason: entry.reason,
            ref_type,
            ref_id,
            warehouse_id: entry.key.warehouse_id,
            product_id: entry.key.product_id,
            batch_id: entry.key.batch_id,
            qty: entry.qty,
            unit_cost: entry.unit_cost,
            created_by: entry.created_by,
            created_at: entry.created_at,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            batch_id: self.batch_id,
        }
    }

    pub fn is_inward(&self) -> bool {
        self.qty.is_positive()
    }

    pub fn is_outward(&self) -> bool {
        self.qty.is_negative()
    }
}

/// A ledger row paired with the running balance of its key after the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningBalance {
    pub entry: LedgerEntry,
    pub balance: Quantity,
}

/// Replay ledger rows in `(created_at, id)` order and attach the running
/// balance of each row's key.
///
/// Input order does not matter; the result is in ledger order.
pub fn replay_running_balances(mut entries: Vec<LedgerEntry>) -> Vec<RunningBalance> {
    entries.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

    let mut balances: HashMap<StockKey, Quantity> = HashMap::new();
    entries
        .into_iter()
        .map(|entry| {
            let balance = balances.entry(entry.key()).or_insert(Quantity::ZERO);
            *balance += entry.qty;
            RunningBalance {
                balance: *balance,
                entry,
            }
        })
        .collect()
}
