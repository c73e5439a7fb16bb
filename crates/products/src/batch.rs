use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_core::{BatchId, DomainError, DomainResult, Entity, ProductId};

/// Fractional digits kept for MRP (`NUMERIC(12,2)`).
const MRP_SCALE: u32 = 2;

/// Natural identity of a batch: `(product_id, batch_no, expiry_date)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub product_id: ProductId,
    pub batch_no: String,
    pub expiry_date: NaiveDate,
}

/// Expiry-tracked sub-lot of a product; the finest granularity stock is held at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub product_id: ProductId,
    pub batch_no: String,
    pub expiry_date: NaiveDate,
    pub mfg_date: Option<NaiveDate>,
    /// Maximum retail price.
    pub mrp: Option<Decimal>,
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: register a batch of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_id: ProductId,
    pub batch_no: String,
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub mfg_date: Option<NaiveDate>,
    #[serde(default)]
    pub mrp: Option<Decimal>,
}

impl Batch {
    pub fn create(id: BatchId, cmd: NewBatch) -> DomainResult<Self> {
        let batch_no = normalize_batch_no(&cmd.batch_no)?;

        if let Some(mfg) = cmd.mfg_date {
            if mfg > cmd.expiry_date {
                return Err(DomainError::validation(format!(
                    "mfg_date {mfg} is after expiry_date {}",
                    cmd.expiry_date
                )));
            }
        }

        let mrp = match cmd.mrp {
            Some(mrp) => Some(ensure_mrp(mrp)?),
            None => None,
        };

        Ok(Self {
            id,
            product_id: cmd.product_id,
            batch_no,
            expiry_date: cmd.expiry_date,
            mfg_date: cmd.mfg_date,
            mrp,
        })
    }

    pub fn key(&self) -> BatchKey {
        BatchKey {
            product_id: self.product_id,
            batch_no: self.batch_no.clone(),
            expiry_date: self.expiry_date,
        }
    }

    pub fn belongs_to(&self, product_id: ProductId) -> bool {
        self.product_id == product_id
    }

    pub fn is_expired_on(&self, day: NaiveDate) -> bool {
        self.expiry_date < day
    }
}

impl BatchKey {
    pub fn new(
        product_id: ProductId,
        batch_no: &str,
        expiry_date: NaiveDate,
    ) -> DomainResult<Self> {
        Ok(Self {
            product_id,
            batch_no: normalize_batch_no(batch_no)?,
            expiry_date,
        })
    }
}

fn normalize_batch_no(batch_no: &str) -> DomainResult<String> {
    let trimmed = batch_no.trim();
    if trimmed.is_empty() {
        return Err(DomainError::batch_required("batch_no cannot be empty"));
    }
    if trimmed.chars().count() > 100 {
        return Err(DomainError::validation("batch_no cannot exceed 100 characters"));
    }
    Ok(trimmed.to_string())
}

fn ensure_mrp(mrp: Decimal) -> DomainResult<Decimal> {
    if mrp < Decimal::ZERO {
        return Err(DomainError::validation("mrp cannot be negative"));
    }
    if mrp.normalize().scale() > MRP_SCALE {
        return Err(DomainError::validation(format!(
            "mrp {mrp} has more than {MRP_SCALE} decimal places"
        )));
    }
    let mut fitted = mrp;
    fitted.rescale(MRP_SCALE);
    Ok(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_batch(product_id: ProductId) -> NewBatch {
        NewBatch {
            product_id,
            batch_no: " B-1001 ".to_string(),
            expiry_date: day(2027, 6, 30),
            mfg_date: Some(day(2025, 7, 1)),
            mrp: Some(Decimal::new(4550, 2)),
        }
    }

    #[test]
    fn create_trims_batch_no_and_builds_key() {
        let product_id = ProductId::new();
        let batch = Batch::create(BatchId::new(), new_batch(product_id)).unwrap();
        assert_eq!(batch.batch_no, "B-1001");
        assert_eq!(
            batch.key(),
            BatchKey::new(product_id, "B-1001", day(2027, 6, 30)).unwrap()
        );
        assert!(batch.belongs_to(product_id));
        assert!(!batch.belongs_to(ProductId::new()));
    }

    #[test]
    fn blank_batch_no_requires_a_batch() {
        let mut cmd = new_batch(ProductId::new());
        cmd.batch_no = "   ".to_string();
        let err = Batch::create(BatchId::new(), cmd).unwrap_err();
        assert_eq!(err.code(), "BATCH_REQUIRED");
    }

    #[test]
    fn mfg_date_after_expiry_is_rejected() {
        let mut cmd = new_batch(ProductId::new());
        cmd.mfg_date = Some(day(2028, 1, 1));
        assert!(matches!(
            Batch::create(BatchId::new(), cmd),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn expiry_is_exclusive_of_the_expiry_day() {
        let batch = Batch::create(BatchId::new(), new_batch(ProductId::new())).unwrap();
        assert!(!batch.is_expired_on(day(2027, 6, 30)));
        assert!(batch.is_expired_on(day(2027, 7, 1)));
    }
}
