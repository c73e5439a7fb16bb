//! Fixed-scale decimal values for stock quantities and unit costs.
//!
//! Quantities carry exactly [`QTY_SCALE`] fractional digits and unit costs
//! [`COST_SCALE`]. Construction rejects values with more precision than the
//! scale allows instead of rounding, so a value read back from storage or from
//! the wire is always the value that was written.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Fractional digits kept for quantities.
pub const QTY_SCALE: u32 = 3;

/// Fractional digits kept for unit costs.
pub const COST_SCALE: u32 = 4;

fn fit_scale(value: Decimal, scale: u32) -> Option<Decimal> {
    if value.normalize().scale() > scale {
        return None;
    }
    let mut fitted = value;
    fitted.rescale(scale);
    Some(fitted)
}

/// Signed stock quantity (scale 3).
///
/// Ledger rows store signed quantities (negative for outward movements), so
/// the type itself allows any sign; operations that need a positive amount
/// check it explicitly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::from_parts(0, 0, 0, false, QTY_SCALE));

    pub fn new(value: Decimal) -> DomainResult<Self> {
        fit_scale(value, QTY_SCALE).map(Self).ok_or_else(|| {
            DomainError::invalid_quantity(format!(
                "Quantity {value} has more than {QTY_SCALE} decimal places"
            ))
        })
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// `max(self - other, 0)`.
    pub fn saturating_remaining(self, other: Quantity) -> Quantity {
        if other >= self { Self::ZERO } else { self - other }
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl From<i64> for Quantity {
    fn from(units: i64) -> Self {
        let mut value = Decimal::from(units);
        value.rescale(QTY_SCALE);
        Self(value)
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::invalid_quantity(format!("invalid quantity {s:?}: {e}")))?;
        Self::new(value)
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

// Sums and differences of two scale-3 values stay at scale 3.
impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 - rhs.0)
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity(-self.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.0 -= rhs.0;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Non-negative unit cost (scale 4).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct UnitCost(Decimal);

impl UnitCost {
    pub const ZERO: UnitCost = UnitCost(Decimal::from_parts(0, 0, 0, false, COST_SCALE));

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "unit cost cannot be negative: {value}"
            )));
        }
        fit_scale(value, COST_SCALE).map(Self).ok_or_else(|| {
            DomainError::validation(format!(
                "unit cost {value} has more than {COST_SCALE} decimal places"
            ))
        })
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Line value `qty * cost`, rounded to the cost scale.
    pub fn extend(&self, qty: Quantity) -> Decimal {
        (self.0 * qty.value()).round_dp(COST_SCALE)
    }
}

impl TryFrom<Decimal> for UnitCost {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitCost> for Decimal {
    fn from(value: UnitCost) -> Self {
        value.0
    }
}

impl FromStr for UnitCost {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid unit cost {s:?}: {e}")))?;
        Self::new(value)
    }
}

impl core::fmt::Display for UnitCost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn qty(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn quantities_are_stored_at_scale_three() {
        assert_eq!(qty("2.5").to_string(), "2.500");
        assert_eq!(Quantity::from(7).to_string(), "7.000");
        assert_eq!(Quantity::ZERO.to_string(), "0.000");
    }

    #[test]
    fn trailing_zeros_beyond_scale_are_accepted() {
        assert_eq!(qty("1.250000"), qty("1.25"));
    }

    #[test]
    fn over_precise_quantity_is_rejected() {
        let err = "0.0001".parse::<Quantity>().unwrap_err();
        assert_eq!(err.code(), "INVALID_QUANTITY");
    }

    #[test]
    fn unit_cost_rejects_negative_and_over_precise_values() {
        assert!("-1".parse::<UnitCost>().is_err());
        assert!("1.23456".parse::<UnitCost>().is_err());
        assert_eq!("12.5".parse::<UnitCost>().unwrap().to_string(), "12.5000");
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let json = serde_json::to_string(&qty("3.14")).unwrap();
        assert_eq!(json, "\"3.140\"");
        let back: Quantity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, qty("3.14"));
        assert!(serde_json::from_str::<Quantity>("\"0.0005\"").is_err());
    }

    #[test]
    fn extend_multiplies_and_rounds_to_cost_scale() {
        let cost: UnitCost = "1.3333".parse().unwrap();
        assert_eq!(cost.extend(qty("3")).to_string(), "3.9999");
    }

    #[test]
    fn saturating_remaining_never_goes_negative() {
        assert_eq!(qty("10").saturating_remaining(qty("4")), qty("6"));
        assert_eq!(qty("4").saturating_remaining(qty("10")), Quantity::ZERO);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn summing_thousands_of_postings_does_not_drift(milli in proptest::collection::vec(-5_000i64..5_000, 1..2_000)) {
            let total: Quantity = milli
                .iter()
                .map(|m| Quantity::new(Decimal::new(*m, 3)).unwrap())
                .sum();
            let expected: i64 = milli.iter().sum();
            prop_assert_eq!(total.value(), Decimal::new(expected, 3));
        }
    }
}
