//! Purchase order and goods-receipt workflow.
//!
//! Drafting a GRN touches no stock: it validates the request against the
//! order as it stands and resolves batches. Posting is the one step that moves
//! stock; it locks the GRN and then its order, re-checks every line against
//! the order's current received quantities and books each line through the
//! Stock Engine in the same transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use medstock_core::{BatchId, DomainError, GrnId, PurchaseOrderId, UserId};
use medstock_inventory::{InventoryReason, StockRef};
use medstock_products::{Batch, NewBatch};
use medstock_purchasing::{
    BatchSelector, Grn, NewGrn, NewPurchaseOrder, PurchaseOrder, PurchaseOrderStatus,
    ReceiptLinePlan, draft_grn, new_grn_number, new_po_number, post_grn_against,
    validate_receipt_request,
};

use super::stock::{StockMovementRequest, StockPosting, stock_in_in};
use crate::error::ServiceResult;
use crate::store::{Database, PurchasingRepo, StoreTx};

/// A posted GRN together with the order it settled and the stock it booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedGrn {
    pub grn: Grn,
    pub purchase_order: PurchaseOrder,
    pub postings: Vec<StockPosting>,
}

#[derive(Clone)]
pub struct PurchasingService<D> {
    db: D,
}

impl<D: Database> PurchasingService<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    #[instrument(
        skip(self, cmd),
        fields(supplier_id = %cmd.supplier_id, warehouse_id = %cmd.warehouse_id, lines = cmd.lines.len()),
        err
    )]
    pub async fn create_po(
        &self,
        cmd: NewPurchaseOrder,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;
        let po = create_po_in(&mut tx, cmd, actor).await?;
        tx.commit().await?;
        info!(po_id = %po.id, po_number = %po.po_number, "purchase order created");
        Ok(po)
    }

    #[instrument(skip(self), err)]
    pub async fn approve_po(
        &self,
        po_id: PurchaseOrderId,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;
        let po = approve_po_in(&mut tx, po_id, actor).await?;
        tx.commit().await?;
        info!(po_number = %po.po_number, "purchase order approved");
        Ok(po)
    }

    #[instrument(skip(self), err)]
    pub async fn cancel_po(
        &self,
        po_id: PurchaseOrderId,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;
        let po = cancel_po_in(&mut tx, po_id, actor).await?;
        tx.commit().await?;
        info!(po_number = %po.po_number, "purchase order cancelled");
        Ok(po)
    }

    #[instrument(skip(self, req), fields(lines = req.lines.len()), err)]
    pub async fn create_grn_from_po(
        &self,
        po_id: PurchaseOrderId,
        req: NewGrn,
        actor: UserId,
    ) -> ServiceResult<Grn> {
        let mut tx = self.db.begin().await?;
        let grn = create_grn_from_po_in(&mut tx, po_id, req, actor).await?;
        tx.commit().await?;
        info!(grn_id = %grn.id, grn_number = %grn.grn_number, "GRN drafted");
        Ok(grn)
    }

    #[instrument(skip(self), err)]
    pub async fn post_grn(&self, grn_id: GrnId, actor: UserId) -> ServiceResult<PostedGrn> {
        let mut tx = self.db.begin().await?;
        let posted = post_grn_in(&mut tx, grn_id, actor).await?;
        tx.commit().await?;
        info!(
            grn_number = %posted.grn.grn_number,
            po_status = posted.purchase_order.status.as_str(),
            ledger_rows = posted.postings.len(),
            "GRN posted"
        );
        Ok(posted)
    }

    #[instrument(skip(self), err)]
    pub async fn cancel_grn(&self, grn_id: GrnId, actor: UserId) -> ServiceResult<Grn> {
        let mut tx = self.db.begin().await?;
        let grn = cancel_grn_in(&mut tx, grn_id, actor).await?;
        tx.commit().await?;
        info!(grn_number = %grn.grn_number, "GRN cancelled");
        Ok(grn)
    }

    pub async fn get_po(&self, po_id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;
        let po = tx
            .get_purchase_order(po_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Purchase order not found"))?;
        tx.rollback().await?;
        Ok(po)
    }

    pub async fn list_pos(
        &self,
        status: Option<PurchaseOrderStatus>,
    ) -> ServiceResult<Vec<PurchaseOrder>> {
        let mut tx = self.db.begin().await?;
        let orders = tx.list_purchase_orders(status).await?;
        tx.rollback().await?;
        Ok(orders)
    }

    pub async fn get_grn(&self, grn_id: GrnId) -> ServiceResult<Grn> {
        let mut tx = self.db.begin().await?;
        let grn = tx
            .get_grn(grn_id)
            .await?
            .ok_or_else(|| DomainError::not_found("GRN not found"))?;
        tx.rollback().await?;
        Ok(grn)
    }

    pub async fn list_grns(&self, po_id: Option<PurchaseOrderId>) -> ServiceResult<Vec<Grn>> {
        let mut tx = self.db.begin().await?;
        let grns = tx.list_grns(po_id).await?;
        tx.rollback().await?;
        Ok(grns)
    }
}

pub async fn create_po_in<T: StoreTx>(
    tx: &mut T,
    cmd: NewPurchaseOrder,
    actor: UserId,
) -> ServiceResult<PurchaseOrder> {
    cmd.validate()?;

    tx.get_party(cmd.supplier_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Supplier not found"))?;
    tx.get_warehouse(cmd.warehouse_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Warehouse not found"))?;
    for line in &cmd.lines {
        tx.get_product(line.product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Product not found: {}", line.product_id)))?;
    }

    let po = PurchaseOrder::draft(
        PurchaseOrderId::new(),
        new_po_number(),
        cmd,
        actor,
        Utc::now(),
    )?;
    tx.save_purchase_order(&po).await?;
    Ok(po)
}

pub async fn approve_po_in<T: StoreTx>(
    tx: &mut T,
    po_id: PurchaseOrderId,
    actor: UserId,
) -> ServiceResult<PurchaseOrder> {
    let mut po = lock_po(tx, po_id).await?;
    po.approve(actor, Utc::now())?;
    tx.save_purchase_order(&po).await?;
    Ok(po)
}

pub async fn cancel_po_in<T: StoreTx>(
    tx: &mut T,
    po_id: PurchaseOrderId,
    actor: UserId,
) -> ServiceResult<PurchaseOrder> {
    let mut po = lock_po(tx, po_id).await?;
    po.cancel(actor, Utc::now())?;
    tx.save_purchase_order(&po).await?;
    Ok(po)
}

pub async fn create_grn_from_po_in<T: StoreTx>(
    tx: &mut T,
    po_id: PurchaseOrderId,
    req: NewGrn,
    actor: UserId,
) -> ServiceResult<Grn> {
    let po = tx
        .get_purchase_order(po_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Purchase order not found"))?;
    let plans = validate_receipt_request(&po, &req)?;

    let mut resolved = Vec::with_capacity(plans.len());
    for plan in plans {
        let (batch_id, expiry_date) = resolve_batch(tx, &plan).await?;
        resolved.push((plan, batch_id, expiry_date));
    }

    let grn = draft_grn(
        GrnId::new(),
        new_grn_number(),
        &po,
        req.received_date,
        resolved,
        actor,
        Utc::now(),
    );
    tx.save_grn(&grn).await?;
    Ok(grn)
}

/// Pick the batch a receipt line goes into, registering a new batch when the
/// `(product, batch_no, expiry)` triple is not known yet.
async fn resolve_batch<T: StoreTx>(
    tx: &mut T,
    plan: &ReceiptLinePlan,
) -> ServiceResult<(BatchId, chrono::NaiveDate)> {
    match &plan.batch {
        BatchSelector::Existing {
            batch_id,
            expiry_date,
        } => {
            let batch = tx.get_batch(*batch_id).await?;
            let batch = BatchSelector::check_existing(batch.as_ref(), plan.product_id, *expiry_date)?;
            Ok((batch.id, batch.expiry_date))
        }
        BatchSelector::ByKey(key) => {
            if let Some(batch) = tx.find_batch(key).await? {
                return Ok((batch.id, batch.expiry_date));
            }
            let batch = Batch::create(
                BatchId::new(),
                NewBatch {
                    product_id: key.product_id,
                    batch_no: key.batch_no.clone(),
                    expiry_date: key.expiry_date,
                    mfg_date: None,
                    mrp: None,
                },
            )?;
            tx.insert_batch(&batch).await?;
            Ok((batch.id, batch.expiry_date))
        }
    }
}

/// Post a DRAFT GRN. Locks are taken GRN first, then its order, then each
/// line's stock summary in line order.
pub async fn post_grn_in<T: StoreTx>(
    tx: &mut T,
    grn_id: GrnId,
    actor: UserId,
) -> ServiceResult<PostedGrn> {
    let mut grn = tx
        .lock_grn(grn_id)
        .await?
        .ok_or_else(|| DomainError::not_found("GRN not found"))?;
    let mut po = lock_po(tx, grn.purchase_order_id).await?;

    let receipts = post_grn_against(&mut grn, &mut po, actor, Utc::now())?;
    let reference = StockRef::grn(&grn.grn_number)?;

    let mut postings = Vec::with_capacity(receipts.len());
    for receipt in receipts {
        let req = StockMovementRequest {
            warehouse_id: grn.warehouse_id,
            product_id: receipt.product_id,
            batch_id: receipt.batch_id,
            reason: InventoryReason::PurchaseGrn,
            actor,
            reference: Some(reference.clone()),
            unit_cost: receipt.unit_cost,
        };
        postings.push(stock_in_in(tx, &req, receipt.qty).await?);
    }

    tx.save_purchase_order(&po).await?;
    tx.save_grn(&grn).await?;
    Ok(PostedGrn {
        grn,
        purchase_order: po,
        postings,
    })
}

pub async fn cancel_grn_in<T: StoreTx>(
    tx: &mut T,
    grn_id: GrnId,
    actor: UserId,
) -> ServiceResult<Grn> {
    let mut grn = tx
        .lock_grn(grn_id)
        .await?
        .ok_or_else(|| DomainError::not_found("GRN not found"))?;
    grn.cancel(actor, Utc::now())?;
    tx.save_grn(&grn).await?;
    Ok(grn)
}

async fn lock_po<T: StoreTx>(tx: &mut T, po_id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
    Ok(tx
        .lock_purchase_order(po_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Purchase order not found"))?)
}
