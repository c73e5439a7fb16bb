use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{
    BatchId, DomainError, DomainResult, Entity, GrnId, GrnLineId, PartyId, ProductId,
    PurchaseOrderId, PurchaseOrderLineId, Quantity, UnitCost, UserId, WarehouseId,
};
use medstock_products::{Batch, BatchKey};

use crate::status::{GrnStatus, validate_grn_transition};

/// One received line of a GRN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnLine {
    pub id: GrnLineId,
    pub grn_id: GrnId,
    pub po_line_id: PurchaseOrderLineId,
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub received_qty: Quantity,
    pub free_qty: Quantity,
    pub unit_cost: Option<UnitCost>,
    /// Expiry of the resolved batch.
    pub expiry_date: NaiveDate,
}

impl GrnLine {
    /// Quantity that enters stock: billed plus free goods.
    pub fn stock_qty(&self) -> Quantity {
        self.received_qty + self.free_qty
    }
}

/// Goods receipt note.
///
/// Created in DRAFT from a purchase order; posting is the one-way trigger
/// into the inventory ledger and makes the document immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grn {
    pub id: GrnId,
    pub grn_number: String,
    pub purchase_order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub warehouse_id: WarehouseId,
    pub status: GrnStatus,
    pub received_date: NaiveDate,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<UserId>,
    pub cancelled_by: Option<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<GrnLine>,
}

impl Entity for Grn {
    type Id = GrnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: one line of a GRN drafted against a PO line.
///
/// The batch is identified either by `batch_id` or by the
/// `(batch_no, expiry_date)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrnLine {
    pub po_line_id: PurchaseOrderLineId,
    pub received_qty: Quantity,
    #[serde(default)]
    pub free_qty: Quantity,
    #[serde(default)]
    pub unit_cost: Option<UnitCost>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub batch_no: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

/// Command: draft a GRN from a purchase order.
///
/// `supplier_id` / `warehouse_id`, when given, must match the order's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrn {
    #[serde(default)]
    pub supplier_id: Option<PartyId>,
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    pub received_date: NaiveDate,
    pub lines: Vec<NewGrnLine>,
}

/// How a GRN line identifies its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelector {
    /// A batch that must already exist.
    Existing {
        batch_id: BatchId,
        expiry_date: Option<NaiveDate>,
    },
    /// Reuse the batch with this identity, or register it.
    ByKey(BatchKey),
}

impl NewGrnLine {
    pub fn batch_selector(&self, product_id: ProductId) -> DomainResult<BatchSelector> {
        let batch_no = self
            .batch_no
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (self.batch_id, batch_no) {
            (Some(_), Some(_)) => Err(DomainError::batch_required(
                "Provide either batch_id or batch_no, not both",
            )),
            (Some(batch_id), None) => Ok(BatchSelector::Existing {
                batch_id,
                expiry_date: self.expiry_date,
            }),
            (None, Some(batch_no)) => {
                let expiry_date = self.expiry_date.ok_or_else(|| {
                    DomainError::batch_required("Expiry date is required for medical batch receipt")
                })?;
                Ok(BatchSelector::ByKey(BatchKey::new(
                    product_id,
                    batch_no,
                    expiry_date,
                )?))
            }
            (None, None) => Err(DomainError::batch_required(
                "Batch is required: provide batch_id or batch_no",
            )),
        }
    }
}

impl BatchSelector {
    /// Check an existing batch picked by id against the line it is used on.
    /// `None` means the id does not exist.
    pub fn check_existing(
        batch: Option<&Batch>,
        product_id: ProductId,
        expiry_date: Option<NaiveDate>,
    ) -> DomainResult<&Batch> {
        let batch = batch
            .ok_or_else(|| DomainError::batch_required("Provided batch_id does not exist"))?;
        if !batch.belongs_to(product_id) {
            return Err(DomainError::batch_required(
                "Provided batch does not belong to the selected product",
            ));
        }
        if let Some(expiry) = expiry_date {
            if expiry != batch.expiry_date {
                return Err(DomainError::batch_required(
                    "Provided expiry_date does not match selected batch",
                ));
            }
        }
        Ok(batch)
    }
}

impl Grn {
    pub fn ensure_can_post(&self) -> DomainResult<()> {
        validate_grn_transition(self.status, GrnStatus::Posted)?;
        if self.lines.is_empty() {
            return Err(DomainError::invalid_state("Cannot post an empty GRN"));
        }
        Ok(())
    }

    pub fn mark_posted(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        validate_grn_transition(self.status, GrnStatus::Posted)?;
        self.status = GrnStatus::Posted;
        self.posted_at = Some(now);
        self.posted_by = Some(actor);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        validate_grn_transition(self.status, GrnStatus::Cancelled)?;
        self.status = GrnStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.updated_at = now;
        Ok(())
    }

    pub fn total_stock_qty(&self) -> Quantity {
        self.lines.iter().map(GrnLine::stock_qty).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_products::NewBatch;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn line() -> NewGrnLine {
        NewGrnLine {
            po_line_id: PurchaseOrderLineId::new(),
            received_qty: Quantity::from(5),
            free_qty: Quantity::ZERO,
            unit_cost: None,
            batch_id: None,
            batch_no: None,
            expiry_date: None,
        }
    }

    fn batch(product_id: ProductId) -> Batch {
        Batch::create(
            BatchId::new(),
            NewBatch {
                product_id,
                batch_no: "B1".to_string(),
                expiry_date: day(2027, 3, 31),
                mfg_date: None,
                mrp: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn batch_is_required_in_some_form() {
        let err = line().batch_selector(ProductId::new()).unwrap_err();
        assert_eq!(err.code(), "BATCH_REQUIRED");
    }

    #[test]
    fn batch_no_without_expiry_is_rejected() {
        let mut l = line();
        l.batch_no = Some("LOT-7".to_string());
        let err = l.batch_selector(ProductId::new()).unwrap_err();
        assert_eq!(err.message(), "Expiry date is required for medical batch receipt");
    }

    #[test]
    fn both_forms_at_once_are_ambiguous() {
        let mut l = line();
        l.batch_id = Some(BatchId::new());
        l.batch_no = Some("LOT-7".to_string());
        l.expiry_date = Some(day(2027, 1, 1));
        assert_eq!(
            l.batch_selector(ProductId::new()).unwrap_err().code(),
            "BATCH_REQUIRED"
        );
    }

    #[test]
    fn batch_no_and_expiry_select_by_key() {
        let product_id = ProductId::new();
        let mut l = line();
        l.batch_no = Some(" LOT-7 ".to_string());
        l.expiry_date = Some(day(2027, 1, 1));
        match l.batch_selector(product_id).unwrap() {
            BatchSelector::ByKey(key) => {
                assert_eq!(key.product_id, product_id);
                assert_eq!(key.batch_no, "LOT-7");
            }
            other => panic!("expected ByKey, got {other:?}"),
        }
    }

    #[test]
    fn existing_batch_must_match_product_and_expiry() {
        let product_id = ProductId::new();
        let b = batch(product_id);

        assert!(BatchSelector::check_existing(Some(&b), product_id, None).is_ok());
        assert!(BatchSelector::check_existing(Some(&b), product_id, Some(b.expiry_date)).is_ok());

        for err in [
            BatchSelector::check_existing(None, product_id, None).unwrap_err(),
            BatchSelector::check_existing(Some(&b), ProductId::new(), None).unwrap_err(),
            BatchSelector::check_existing(Some(&b), product_id, Some(day(2030, 1, 1)))
                .unwrap_err(),
        ] {
            assert_eq!(err.code(), "BATCH_REQUIRED");
        }
    }
}
