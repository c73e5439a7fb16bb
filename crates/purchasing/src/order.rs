use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{
    DomainError, DomainResult, Entity, PartyId, ProductId, PurchaseOrderId, PurchaseOrderLineId,
    Quantity, UnitCost, UserId, WarehouseId,
};

use crate::status::{PurchaseOrderStatus, validate_po_transition};

/// Purchase order line.
///
/// Invariant: `0 <= received_qty <= ordered_qty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: PurchaseOrderLineId,
    pub purchase_order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub ordered_qty: Quantity,
    /// Cumulative quantity received through posted GRNs.
    pub received_qty: Quantity,
    pub free_qty: Quantity,
    pub unit_cost: Option<UnitCost>,
    pub line_notes: Option<String>,
}

impl PurchaseOrderLine {
    pub fn remaining(&self) -> Quantity {
        self.ordered_qty.saturating_remaining(self.received_qty)
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_qty >= self.ordered_qty
    }
}

/// Purchase order document with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub po_number: String,
    pub supplier_id: PartyId,
    pub warehouse_id: WarehouseId,
    pub status: PurchaseOrderStatus,
    pub order_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub approved_by: Option<UserId>,
    pub cancelled_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<PurchaseOrderLine>,
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: one line of a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrderLine {
    pub product_id: ProductId,
    pub ordered_qty: Quantity,
    #[serde(default)]
    pub free_qty: Quantity,
    #[serde(default)]
    pub unit_cost: Option<UnitCost>,
    #[serde(default)]
    pub line_notes: Option<String>,
}

/// Command: create a purchase order in DRAFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: PartyId,
    pub warehouse_id: WarehouseId,
    pub order_date: NaiveDate,
    #[serde(default)]
    pub expected_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<NewPurchaseOrderLine>,
}

impl NewPurchaseOrder {
    /// Checks that need no stored state.
    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::invariant(
                "Purchase order must include at least one line",
            ));
        }
        if let Some(expected) = self.expected_date {
            if expected < self.order_date {
                return Err(DomainError::validation(format!(
                    "expected_date {expected} is before order_date {}",
                    self.order_date
                )));
            }
        }
        for line in &self.lines {
            if !line.ordered_qty.is_positive() {
                return Err(DomainError::invalid_quantity(
                    "Ordered quantity must be greater than zero",
                ));
            }
            if line.free_qty.is_negative() {
                return Err(DomainError::invalid_quantity("Free quantity cannot be negative"));
            }
        }
        Ok(())
    }
}

fn clean_text(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl PurchaseOrder {
    /// Build a DRAFT order. Every line starts with nothing received.
    ///
    /// Existence of the supplier, warehouse and products is checked by the
    /// caller against the store.
    pub fn draft(
        id: PurchaseOrderId,
        po_number: String,
        cmd: NewPurchaseOrder,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        cmd.validate()?;

        let lines = cmd
            .lines
            .into_iter()
            .map(|line| PurchaseOrderLine {
                id: PurchaseOrderLineId::new(),
                purchase_order_id: id,
                product_id: line.product_id,
                ordered_qty: line.ordered_qty,
                received_qty: Quantity::ZERO,
                free_qty: line.free_qty,
                unit_cost: line.unit_cost,
                line_notes: clean_text(line.line_notes),
            })
            .collect();

        Ok(Self {
            id,
            po_number,
            supplier_id: cmd.supplier_id,
            warehouse_id: cmd.warehouse_id,
            status: PurchaseOrderStatus::Draft,
            order_date: cmd.order_date,
            expected_date: cmd.expected_date,
            notes: clean_text(cmd.notes),
            created_by,
            approved_by: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
            lines,
        })
    }

    pub fn line(&self, line_id: PurchaseOrderLineId) -> Option<&PurchaseOrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn approve(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            PurchaseOrderStatus::Draft => {}
            PurchaseOrderStatus::Approved => {
                return Err(DomainError::invalid_state(
                    "Purchase order is already approved",
                ));
            }
            other => {
                return Err(DomainError::invalid_state(format!(
                    "Purchase order cannot be approved from status {other}"
                )));
            }
        }
        if self.lines.is_empty() {
            return Err(DomainError::invalid_state(
                "Cannot approve a purchase order without lines",
            ));
        }

        self.transition(PurchaseOrderStatus::Approved, now)?;
        self.approved_by = Some(actor);
        Ok(())
    }

    /// Receipts are only accepted while the order is APPROVED or PARTIALLY_RECEIVED.
    pub fn ensure_can_receive(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(
                "Purchase order cannot be modified once closed or cancelled",
            ));
        }
        if !matches!(
            self.status,
            PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(DomainError::po_not_approved(
                "Purchase order must be APPROVED or PARTIALLY_RECEIVED to accept receipts",
            ));
        }
        Ok(())
    }

    /// Accumulate a received quantity on one line, checked against what is
    /// currently left on that line.
    pub fn record_receipt(
        &mut self,
        line_id: PurchaseOrderLineId,
        received: Quantity,
    ) -> DomainResult<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| {
                DomainError::invalid_state(
                    "GRN line references a PO line from a different purchase order",
                )
            })?;

        if received > line.remaining() {
            return Err(DomainError::over_receipt(format!(
                "Cannot receive more than remaining quantity ({} left on line)",
                line.remaining()
            )));
        }
        line.received_qty += received;
        Ok(())
    }

    /// After receipts: CLOSED when every line is fully received, otherwise
    /// PARTIALLY_RECEIVED.
    pub fn settle_receipt_status(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        let target = if self.lines.iter().all(PurchaseOrderLine::is_fully_received) {
            PurchaseOrderStatus::Closed
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };
        self.transition(target, now)
    }

    /// Cancel an order on which nothing has been received yet.
    pub fn cancel(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        if self.lines.iter().any(|l| l.received_qty.is_positive()) {
            return Err(DomainError::invalid_state(
                "Purchase order with received goods cannot be cancelled",
            ));
        }
        self.transition(PurchaseOrderStatus::Cancelled, now)?;
        self.cancelled_by = Some(actor);
        Ok(())
    }

    pub fn total_ordered(&self) -> Quantity {
        self.lines.iter().map(|l| l.ordered_qty).sum()
    }

    pub fn total_received(&self) -> Quantity {
        self.lines.iter().map(|l| l.received_qty).sum()
    }

    fn transition(&mut self, target: PurchaseOrderStatus, now: DateTime<Utc>) -> DomainResult<()> {
        validate_po_transition(self.status, target)?;
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}
