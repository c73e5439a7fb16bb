//! Receiving goods against a purchase order.
//!
//! Two phases: drafting a GRN validates the request against a snapshot of the
//! order; posting re-validates every line against the order's *current*
//! received quantities and produces the stock receipts to book.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{
    BatchId, DomainError, DomainResult, GrnId, GrnLineId, ProductId, PurchaseOrderLineId,
    Quantity, UnitCost, UserId,
};

use crate::grn::{BatchSelector, Grn, GrnLine, NewGrn};
use crate::order::PurchaseOrder;
use crate::status::GrnStatus;

/// A validated GRN request line, waiting for its batch to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLinePlan {
    pub po_line_id: PurchaseOrderLineId,
    pub product_id: ProductId,
    pub received_qty: Quantity,
    pub free_qty: Quantity,
    /// Request cost, falling back to the PO line's cost.
    pub unit_cost: Option<UnitCost>,
    pub batch: BatchSelector,
}

/// Validate a GRN request against the order it receives.
pub fn validate_receipt_request(
    po: &PurchaseOrder,
    req: &NewGrn,
) -> DomainResult<Vec<ReceiptLinePlan>> {
    po.ensure_can_receive()?;

    if req.supplier_id.is_some_and(|s| s != po.supplier_id) {
        return Err(DomainError::supplier_mismatch(
            "GRN supplier does not match purchase order supplier",
        ));
    }
    if req.warehouse_id.is_some_and(|w| w != po.warehouse_id) {
        return Err(DomainError::warehouse_mismatch(
            "GRN warehouse does not match purchase order warehouse",
        ));
    }
    if req.lines.is_empty() {
        return Err(DomainError::invariant("GRN must include at least one line"));
    }

    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(req.lines.len());
    for line in &req.lines {
        if !seen.insert(line.po_line_id) {
            return Err(DomainError::invariant("Duplicate po_line_id in GRN lines"));
        }

        let po_line = po.line(line.po_line_id).ok_or_else(|| {
            DomainError::invalid_state(
                "GRN line references a PO line from a different purchase order",
            )
        })?;

        if !line.received_qty.is_positive() {
            return Err(DomainError::invariant(
                "Received quantity must be greater than zero",
            ));
        }
        if line.received_qty > po_line.remaining() {
            return Err(DomainError::over_receipt(format!(
                "Cannot receive more than remaining quantity ({} left on line)",
                po_line.remaining()
            )));
        }
        if line.free_qty.is_negative() {
            return Err(DomainError::invariant("Free quantity cannot be negative"));
        }

        plans.push(ReceiptLinePlan {
            po_line_id: po_line.id,
            product_id: po_line.product_id,
            received_qty: line.received_qty,
            free_qty: line.free_qty,
            unit_cost: line.unit_cost.or(po_line.unit_cost),
            batch: line.batch_selector(po_line.product_id)?,
        });
    }
    Ok(plans)
}

/// Assemble a DRAFT GRN once every plan has a resolved `(batch_id, expiry)`.
pub fn draft_grn(
    id: GrnId,
    grn_number: String,
    po: &PurchaseOrder,
    received_date: NaiveDate,
    lines: Vec<(ReceiptLinePlan, BatchId, NaiveDate)>,
    created_by: UserId,
    now: DateTime<Utc>,
) -> Grn {
    let lines = lines
        .into_iter()
        .map(|(plan, batch_id, expiry_date)| GrnLine {
            id: GrnLineId::new(),
            grn_id: id,
            po_line_id: plan.po_line_id,
            product_id: plan.product_id,
            batch_id,
            received_qty: plan.received_qty,
            free_qty: plan.free_qty,
            unit_cost: plan.unit_cost,
            expiry_date,
        })
        .collect();

    Grn {
        id,
        grn_number,
        purchase_order_id: po.id,
        supplier_id: po.supplier_id,
        warehouse_id: po.warehouse_id,
        status: GrnStatus::Draft,
        received_date,
        posted_at: None,
        posted_by: None,
        cancelled_by: None,
        created_by,
        created_at: now,
        updated_at: now,
        lines,
    }
}

/// One stock-in the caller must book for a posted GRN line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceipt {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    /// Received plus free quantity.
    pub qty: Quantity,
    pub unit_cost: Option<UnitCost>,
}

/// Post `grn` against `po`: accumulate received quantities on the order,
/// settle both documents' statuses and return the receipts to book, in line
/// order.
///
/// On error the documents may be partially mutated; callers hold them as
/// transaction-scoped copies and discard them with the rollback.
pub fn post_grn_against(
    grn: &mut Grn,
    po: &mut PurchaseOrder,
    actor: UserId,
    now: DateTime<Utc>,
) -> DomainResult<Vec<StockReceipt>> {
    grn.ensure_can_post()?;
    if grn.purchase_order_id != po.id {
        return Err(DomainError::invalid_state(
            "GRN does not belong to this purchase order",
        ));
    }
    po.ensure_can_receive()?;

    if grn.warehouse_id != po.warehouse_id {
        return Err(DomainError::warehouse_mismatch(
            "GRN warehouse does not match purchase order warehouse",
        ));
    }
    if grn.supplier_id != po.supplier_id {
        return Err(DomainError::supplier_mismatch(
            "GRN supplier does not match purchase order supplier",
        ));
    }

    let mut receipts = Vec::with_capacity(grn.lines.len());
    for line in &grn.lines {
        po.record_receipt(line.po_line_id, line.received_qty)?;

        let qty = line.stock_qty();
        if !qty.is_positive() {
            return Err(DomainError::invariant("Invalid GRN line quantity"));
        }
        receipts.push(StockReceipt {
            product_id: line.product_id,
            batch_id: line.batch_id,
            qty,
            unit_cost: line.unit_cost,
        });
    }

    po.settle_receipt_status(now)?;
    grn.mark_posted(actor, now)?;
    Ok(receipts)
}
