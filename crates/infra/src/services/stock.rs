//! Stock Engine: the only writer of the inventory ledger and stock summaries.
//!
//! Every movement runs the same steps inside one transaction:
//!
//! ```text
//! check warehouse / product / batch
//!   ↓
//! lock the summary row for (warehouse, product, batch)
//!   ↓
//! apply the movement rules to the locked balance
//!   ↓
//! write the new balance + append the signed ledger row
//! ```
//!
//! Holding the summary lock across the check and the write is what keeps two
//! concurrent stock-outs on one key from both passing the sufficiency check.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use medstock_core::{BatchId, DomainError, ProductId, Quantity, UnitCost, UserId, WarehouseId};
use medstock_inventory::{
    InventoryReason, LedgerEntry, Movement, NewLedgerEntry, StockKey, StockRef, StockSummary,
};

use crate::error::ServiceResult;
use crate::store::{Database, MasterDataRepo, StoreTx};

/// Everything about a stock movement except its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRequest {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub reason: InventoryReason,
    pub actor: UserId,
    #[serde(default)]
    pub reference: Option<StockRef>,
    #[serde(default)]
    pub unit_cost: Option<UnitCost>,
}

impl StockMovementRequest {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id, self.product_id, self.batch_id)
    }
}

/// The ledger row written by a movement and the summary row after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosting {
    pub ledger: LedgerEntry,
    pub summary: StockSummary,
}

#[derive(Clone)]
pub struct StockEngine<D> {
    db: D,
}

impl<D: Database> StockEngine<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    #[instrument(
        skip(self, req),
        fields(key = %req.key(), reason = req.reason.as_str(), qty = %qty),
        err
    )]
    pub async fn stock_in(
        &self,
        req: StockMovementRequest,
        qty: Quantity,
    ) -> ServiceResult<StockPosting> {
        self.run(&req, Movement::In(qty)).await
    }

    #[instrument(
        skip(self, req),
        fields(key = %req.key(), reason = req.reason.as_str(), qty = %qty),
        err
    )]
    pub async fn stock_out(
        &self,
        req: StockMovementRequest,
        qty: Quantity,
    ) -> ServiceResult<StockPosting> {
        self.run(&req, Movement::Out(qty)).await
    }

    #[instrument(
        skip(self, req),
        fields(key = %req.key(), reason = req.reason.as_str(), delta = %delta),
        err
    )]
    pub async fn stock_adjust(
        &self,
        req: StockMovementRequest,
        delta: Quantity,
    ) -> ServiceResult<StockPosting> {
        self.run(&req, Movement::Adjust(delta)).await
    }

    async fn run(
        &self,
        req: &StockMovementRequest,
        movement: Movement,
    ) -> ServiceResult<StockPosting> {
        let mut tx = self.db.begin().await?;
        let posting = post_movement_in(&mut tx, req, movement).await?;
        tx.commit().await?;

        info!(
            ledger_id = posting.ledger.id,
            txn_type = posting.ledger.txn_type.as_str(),
            on_hand = %posting.summary.qty_on_hand,
            "stock movement posted"
        );
        Ok(posting)
    }
}

pub async fn stock_in_in<T: StoreTx>(
    tx: &mut T,
    req: &StockMovementRequest,
    qty: Quantity,
) -> ServiceResult<StockPosting> {
    post_movement_in(tx, req, Movement::In(qty)).await
}

pub async fn stock_out_in<T: StoreTx>(
    tx: &mut T,
    req: &StockMovementRequest,
    qty: Quantity,
) -> ServiceResult<StockPosting> {
    post_movement_in(tx, req, Movement::Out(qty)).await
}

pub async fn stock_adjust_in<T: StoreTx>(
    tx: &mut T,
    req: &StockMovementRequest,
    delta: Quantity,
) -> ServiceResult<StockPosting> {
    post_movement_in(tx, req, Movement::Adjust(delta)).await
}

/// Apply `movement` inside `tx`. Nothing is written when any check fails.
pub async fn post_movement_in<T: StoreTx>(
    tx: &mut T,
    req: &StockMovementRequest,
    movement: Movement,
) -> ServiceResult<StockPosting> {
    movement.validate()?;
    let key = req.key();
    ensure_stock_references(tx, &key).await?;

    let current = tx.lock_stock_summary(&key).await?;
    let posting = movement.apply(current.as_ref())?;

    let now = Utc::now();
    let summary = StockSummary {
        qty_on_hand: posting.new_balance,
        updated_at: now,
        ..current.unwrap_or_else(|| StockSummary::empty(&key, now))
    };
    tx.save_stock_summary(&summary).await?;

    let ledger = tx
        .append_ledger(NewLedgerEntry {
            txn_type: posting.txn_type,
            reason: req.reason,
            reference: req.reference.clone(),
            key,
            qty: posting.signed_qty,
            unit_cost: req.unit_cost,
            created_by: req.actor,
            created_at: now,
        })
        .await?;

    Ok(StockPosting { ledger, summary })
}

async fn ensure_stock_references<T: MasterDataRepo>(tx: &mut T, key: &StockKey) -> ServiceResult<()> {
    tx.get_warehouse(key.warehouse_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Warehouse not found"))?;
    tx.get_product(key.product_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Product not found"))?;
    let batch = tx
        .get_batch(key.batch_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Batch not found"))?;
    if !batch.belongs_to(key.product_id) {
        return Err(DomainError::invariant("Batch does not belong to the selected product").into());
    }
    Ok(())
}
