use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Entity, ProductId};

/// Fractional digits kept for GST rates (`NUMERIC(5,2)`).
const GST_SCALE: u32 = 2;

/// Product master record.
///
/// `sku` is unique across the catalogue; uniqueness is enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub brand: Option<String>,
    /// Unit of measure ("STRIP", "BOTTLE", "BOX"...).
    pub uom: String,
    pub barcode: Option<String>,
    /// HSN classification code used for tax.
    pub hsn: Option<String>,
    /// GST rate in percent.
    pub gst_rate: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: create a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub uom: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub hsn: Option<String>,
    #[serde(default)]
    pub gst_rate: Option<Decimal>,
}

/// Command: partial update. `None` keeps the existing value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub uom: Option<String>,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub hsn: Option<String>,
    pub gst_rate: Option<Decimal>,
    pub is_active: Option<bool>,
}

impl Product {
    pub fn create(id: ProductId, cmd: NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            sku: ensure_text("sku", &cmd.sku, 80)?,
            name: ensure_text("name", &cmd.name, 255)?,
            uom: ensure_text("uom", &cmd.uom, 30)?,
            brand: optional_text(cmd.brand),
            barcode: optional_text(cmd.barcode),
            hsn: optional_text(cmd.hsn),
            gst_rate: cmd.gst_rate.map(ensure_gst_rate).transpose()?,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, cmd: UpdateProduct, now: DateTime<Utc>) -> DomainResult<()> {
        let sku = cmd.sku.as_deref().map(|s| ensure_text("sku", s, 80)).transpose()?;
        let name = cmd.name.as_deref().map(|s| ensure_text("name", s, 255)).transpose()?;
        let uom = cmd.uom.as_deref().map(|s| ensure_text("uom", s, 30)).transpose()?;
        let gst_rate = cmd.gst_rate.map(ensure_gst_rate).transpose()?;

        if let Some(sku) = sku {
            self.sku = sku;
        }
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(uom) = uom {
            self.uom = uom;
        }
        if cmd.brand.is_some() {
            self.brand = optional_text(cmd.brand);
        }
        if cmd.barcode.is_some() {
            self.barcode = optional_text(cmd.barcode);
        }
        if cmd.hsn.is_some() {
            self.hsn = optional_text(cmd.hsn);
        }
        if gst_rate.is_some() {
            self.gst_rate = gst_rate;
        }
        if let Some(active) = cmd.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Soft delete. Deactivating an inactive product is a no-op.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.updated_at = now;
        }
    }
}

fn ensure_text(field: &str, value: &str, max: usize) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn ensure_gst_rate(rate: Decimal) -> DomainResult<Decimal> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(format!(
            "gst_rate must be between 0 and 100, got {rate}"
        )));
    }
    if rate.normalize().scale() > GST_SCALE {
        return Err(DomainError::validation(format!(
            "gst_rate {rate} has more than {GST_SCALE} decimal places"
        )));
    }
    let mut fitted = rate;
    fitted.rescale(GST_SCALE);
    Ok(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn paracetamol() -> NewProduct {
        NewProduct {
            sku: " PCM-500 ".to_string(),
            name: "Paracetamol 500mg".to_string(),
            uom: "STRIP".to_string(),
            brand: Some("Calpol".to_string()),
            barcode: None,
            hsn: Some("3004".to_string()),
            gst_rate: Some(Decimal::new(12, 0)),
        }
    }

    #[test]
    fn create_product_normalizes_fields() {
        let product = Product::create(ProductId::new(), paracetamol(), test_time()).unwrap();
        assert_eq!(product.sku, "PCM-500");
        assert!(product.is_active);
        assert_eq!(product.gst_rate.map(|r| r.to_string()), Some("12.00".to_string()));
    }

    #[test]
    fn create_product_rejects_empty_sku() {
        let mut cmd = paracetamol();
        cmd.sku = "  ".to_string();
        let err = Product::create(ProductId::new(), cmd, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_product_rejects_empty_uom() {
        let mut cmd = paracetamol();
        cmd.uom = String::new();
        assert!(Product::create(ProductId::new(), cmd, test_time()).is_err());
    }

    #[test]
    fn gst_rate_must_be_a_percentage_with_two_decimals() {
        let mut cmd = paracetamol();
        cmd.gst_rate = Some(Decimal::new(101, 0));
        assert!(Product::create(ProductId::new(), cmd.clone(), test_time()).is_err());

        cmd.gst_rate = Some(Decimal::new(12125, 3));
        assert!(Product::create(ProductId::new(), cmd, test_time()).is_err());
    }

    #[test]
    fn update_changes_only_given_fields() {
        let mut product = Product::create(ProductId::new(), paracetamol(), test_time()).unwrap();
        product
            .apply_update(
                UpdateProduct {
                    name: Some("Paracetamol 650mg".to_string()),
                    ..Default::default()
                },
                test_time(),
            )
            .unwrap();
        assert_eq!(product.name, "Paracetamol 650mg");
        assert_eq!(product.sku, "PCM-500");
        assert_eq!(product.brand.as_deref(), Some("Calpol"));
    }

    #[test]
    fn deactivate_is_a_soft_delete() {
        let mut product = Product::create(ProductId::new(), paracetamol(), test_time()).unwrap();
        product.deactivate(test_time());
        assert!(!product.is_active);
        assert_eq!(product.sku, "PCM-500");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                .. ProptestConfig::default()
            })]

            #[test]
            fn gst_rate_within_range_is_accepted(basis_points in 0i64..=10_000) {
                let mut cmd = paracetamol();
                cmd.gst_rate = Some(Decimal::new(basis_points, 2));
                let product = Product::create(ProductId::new(), cmd, Utc::now()).unwrap();
                prop_assert_eq!(product.gst_rate, Some(Decimal::new(basis_points, 2)));
            }
        }
    }
}
