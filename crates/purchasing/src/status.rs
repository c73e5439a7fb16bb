//! Lifecycle states of purchase orders and GRNs, and the allowed transitions.

use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult};

/// Purchase order status lifecycle.
///
/// `DRAFT -> APPROVED -> {PARTIALLY_RECEIVED ->} CLOSED`, or `CANCELLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    PartiallyReceived,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Approved => "APPROVED",
            PurchaseOrderStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            PurchaseOrderStatus::Closed => "CLOSED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Closed | PurchaseOrderStatus::Cancelled)
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(PurchaseOrderStatus::Draft),
            "APPROVED" => Ok(PurchaseOrderStatus::Approved),
            "PARTIALLY_RECEIVED" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "CLOSED" => Ok(PurchaseOrderStatus::Closed),
            "CANCELLED" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// GRN status lifecycle: `DRAFT -> POSTED`, or `DRAFT -> CANCELLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrnStatus {
    Draft,
    Posted,
    Cancelled,
}

impl GrnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GrnStatus::Draft => "DRAFT",
            GrnStatus::Posted => "POSTED",
            GrnStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for GrnStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for GrnStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(GrnStatus::Draft),
            "POSTED" => Ok(GrnStatus::Posted),
            "CANCELLED" => Ok(GrnStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown GRN status: {other}"))),
        }
    }
}

/// Check a purchase order transition.
///
/// `PARTIALLY_RECEIVED -> PARTIALLY_RECEIVED` is allowed: every further
/// partial receipt re-settles the status. Cancellation is only legal before
/// any goods were received.
pub fn validate_po_transition(
    current: PurchaseOrderStatus,
    target: PurchaseOrderStatus,
) -> DomainResult<()> {
    use PurchaseOrderStatus::*;

    let allowed = matches!(
        (current, target),
        (Draft, Approved)
            | (Approved, PartiallyReceived)
            | (Approved, Closed)
            | (PartiallyReceived, PartiallyReceived)
            | (PartiallyReceived, Closed)
            | (Draft, Cancelled)
            | (Approved, Cancelled)
    );
    if allowed {
        return Ok(());
    }
    Err(DomainError::invalid_state(format!(
        "Invalid purchase order state transition: {current} -> {target}"
    )))
}

/// Check a GRN transition. Re-posting is reported as
/// [`DomainError::GrnAlreadyPosted`] so callers can stop instead of retrying.
pub fn validate_grn_transition(current: GrnStatus, target: GrnStatus) -> DomainResult<()> {
    match (current, target) {
        (GrnStatus::Draft, GrnStatus::Posted) | (GrnStatus::Draft, GrnStatus::Cancelled) => Ok(()),
        (GrnStatus::Posted, GrnStatus::Posted) => {
            Err(DomainError::grn_already_posted("GRN already posted"))
        }
        _ => Err(DomainError::invalid_state(format!(
            "Invalid GRN state transition: {current} -> {target}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseOrderStatus::*;

    const ALL: [PurchaseOrderStatus; 5] = [Draft, Approved, PartiallyReceived, Closed, Cancelled];

    #[test]
    fn po_happy_path_is_allowed() {
        assert!(validate_po_transition(Draft, Approved).is_ok());
        assert!(validate_po_transition(Approved, PartiallyReceived).is_ok());
        assert!(validate_po_transition(PartiallyReceived, Closed).is_ok());
        assert!(validate_po_transition(Approved, Closed).is_ok());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Closed, Cancelled] {
            for to in ALL {
                let err = validate_po_transition(from, to).unwrap_err();
                assert_eq!(err.code(), "INVALID_STATE");
                assert_eq!(err.status().as_u16(), 409);
            }
        }
    }

    #[test]
    fn approving_twice_is_invalid() {
        assert!(matches!(
            validate_po_transition(Approved, Approved),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn partially_received_orders_cannot_be_cancelled() {
        assert!(validate_po_transition(PartiallyReceived, Cancelled).is_err());
    }

    #[test]
    fn reposting_is_distinct_from_other_invalid_grn_transitions() {
        assert!(validate_grn_transition(GrnStatus::Draft, GrnStatus::Posted).is_ok());
        assert_eq!(
            validate_grn_transition(GrnStatus::Posted, GrnStatus::Posted)
                .unwrap_err()
                .code(),
            "GRN_ALREADY_POSTED"
        );
        assert_eq!(
            validate_grn_transition(GrnStatus::Cancelled, GrnStatus::Posted)
                .unwrap_err()
                .code(),
            "INVALID_STATE"
        );
        assert!(validate_grn_transition(GrnStatus::Posted, GrnStatus::Draft).is_err());
    }

    #[test]
    fn wire_names_round_trip() {
        for s in ALL {
            assert_eq!(s.as_str().parse::<PurchaseOrderStatus>().unwrap(), s);
        }
        for s in [GrnStatus::Draft, GrnStatus::Posted, GrnStatus::Cancelled] {
            assert_eq!(s.as_str().parse::<GrnStatus>().unwrap(), s);
        }
    }
}
