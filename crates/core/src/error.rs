//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Suggested status class a transport layer should map a failure to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
}

impl StatusClass {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
        }
    }
}

/// Domain-level error.
///
/// Every variant carries a human message; `code()` gives the stable,
/// machine-readable kind and `status()` the suggested status class.
/// Infrastructure failures belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input on master data or requests.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Non-positive quantity where a positive one is required, zero delta,
    /// or a value beyond the fixed decimal scale.
    #[error("{0}")]
    InvalidQuantity(String),

    /// The operation would drive a stock balance negative.
    #[error("{0}")]
    InsufficientStock(String),

    /// Illegal lifecycle transition (conflict semantics).
    #[error("{0}")]
    InvalidState(String),

    /// Structural violation of a document (duplicate line, empty line list...).
    ///
    /// Shares the `INVALID_STATE` code with [`DomainError::InvalidState`] but
    /// is a client error rather than a state conflict.
    #[error("{0}")]
    InvariantViolation(String),

    /// The GRN has already been posted; callers must not retry.
    #[error("{0}")]
    GrnAlreadyPosted(String),

    /// Receipts against a purchase order that is not approved.
    #[error("{0}")]
    PoNotApproved(String),

    /// A receipt line exceeds the remaining quantity of its PO line.
    #[error("{0}")]
    OverReceipt(String),

    /// Batch identification is missing or ambiguous.
    #[error("{0}")]
    BatchRequired(String),

    #[error("{0}")]
    SupplierMismatch(String),

    #[error("{0}")]
    WarehouseMismatch(String),

    /// Permission gate or lockout guard refused the operation.
    #[error("{0}")]
    Forbidden(String),

    /// Uniqueness violation (duplicate SKU, email, code...).
    #[error("{0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn grn_already_posted(msg: impl Into<String>) -> Self {
        Self::GrnAlreadyPosted(msg.into())
    }

    pub fn po_not_approved(msg: impl Into<String>) -> Self {
        Self::PoNotApproved(msg.into())
    }

    pub fn over_receipt(msg: impl Into<String>) -> Self {
        Self::OverReceipt(msg.into())
    }

    pub fn batch_required(msg: impl Into<String>) -> Self {
        Self::BatchRequired(msg.into())
    }

    pub fn supplier_mismatch(msg: impl Into<String>) -> Self {
        Self::SupplierMismatch(msg.into())
    }

    pub fn warehouse_mismatch(msg: impl Into<String>) -> Self {
        Self::WarehouseMismatch(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidId(_) => "INVALID_ID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::InvalidState(_) | Self::InvariantViolation(_) => "INVALID_STATE",
            Self::GrnAlreadyPosted(_) => "GRN_ALREADY_POSTED",
            Self::PoNotApproved(_) => "PO_NOT_APPROVED",
            Self::OverReceipt(_) => "OVER_RECEIPT",
            Self::BatchRequired(_) => "BATCH_REQUIRED",
            Self::SupplierMismatch(_) => "SUPPLIER_MISMATCH",
            Self::WarehouseMismatch(_) => "WAREHOUSE_MISMATCH",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
        }
    }

    pub fn status(&self) -> StatusClass {
        match self {
            Self::NotFound(_) => StatusClass::NotFound,
            Self::Forbidden(_) => StatusClass::Forbidden,
            Self::InvalidState(_)
            | Self::GrnAlreadyPosted(_)
            | Self::PoNotApproved(_)
            | Self::Conflict(_) => StatusClass::Conflict,
            Self::Validation(_)
            | Self::InvalidId(_)
            | Self::InvalidQuantity(_)
            | Self::InsufficientStock(_)
            | Self::InvariantViolation(_)
            | Self::OverReceipt(_)
            | Self::BatchRequired(_)
            | Self::SupplierMismatch(_)
            | Self::WarehouseMismatch(_) => StatusClass::BadRequest,
        }
    }

    /// Human-readable message without the code.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::InvalidId(m)
            | Self::NotFound(m)
            | Self::InvalidQuantity(m)
            | Self::InsufficientStock(m)
            | Self::InvalidState(m)
            | Self::InvariantViolation(m)
            | Self::GrnAlreadyPosted(m)
            | Self::PoNotApproved(m)
            | Self::OverReceipt(m)
            | Self::BatchRequired(m)
            | Self::SupplierMismatch(m)
            | Self::WarehouseMismatch(m)
            | Self::Forbidden(m)
            | Self::Conflict(m) => m.clone(),
        }
    }
}
