//! Infrastructure and service-level errors.

use thiserror::Error;

use medstock_core::{DomainError, StatusClass};

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (at insert or commit).
    #[error("unique constraint '{constraint}' violated: {detail}")]
    UniqueViolation {
        constraint: &'static str,
        detail: String,
    },

    /// A row lock could not be acquired within the configured timeout.
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// A stored row could not be turned back into a domain value.
    #[error("failed to decode stored row: {0}")]
    Decode(String),

    /// In-memory table or lock registry poisoned by a panicking writer.
    #[error("store state poisoned: {0}")]
    Poisoned(&'static str),

    #[error("database error in {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn decode(err: impl core::fmt::Display) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Error returned by every service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { detail, .. } => {
                ServiceError::Domain(DomainError::conflict(detail))
            }
            other => ServiceError::Store(other),
        }
    }
}

impl From<medstock_auth::AuthzError> for ServiceError {
    fn from(err: medstock_auth::AuthzError) -> Self {
        ServiceError::Domain(err.into())
    }
}

impl ServiceError {
    /// Machine-readable code; store failures are `INTERNAL_ERROR`, except
    /// lock timeouts which are `LOCK_TIMEOUT`.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(e) => e.code(),
            ServiceError::Store(StoreError::LockTimeout(_)) => "LOCK_TIMEOUT",
            ServiceError::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested status code: the domain status class, 409 for lock timeouts
    /// and 500 for other store failures.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Domain(e) => e.status().as_u16(),
            ServiceError::Store(StoreError::LockTimeout(_)) => StatusClass::Conflict.as_u16(),
            ServiceError::Store(_) => 500,
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Store(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violations_surface_as_conflicts() {
        let err: ServiceError = StoreError::UniqueViolation {
            constraint: "products_sku_key",
            detail: "Product SKU already exists: PCM-500".to_string(),
        }
        .into();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.status(), 409);
        assert_eq!(err.to_string(), "Product SKU already exists: PCM-500");
    }

    #[test]
    fn store_failures_are_internal_except_lock_timeouts() {
        let poisoned: ServiceError = StoreError::Poisoned("tables").into();
        assert_eq!(poisoned.code(), "INTERNAL_ERROR");
        assert_eq!(poisoned.status(), 500);

        let timeout: ServiceError = StoreError::LockTimeout("stock summary".to_string()).into();
        assert_eq!(timeout.code(), "LOCK_TIMEOUT");
        assert_eq!(timeout.status(), 409);
    }

    #[test]
    fn domain_errors_pass_through_unchanged() {
        let err: ServiceError = DomainError::grn_already_posted("GRN already posted").into();
        assert_eq!(err.code(), "GRN_ALREADY_POSTED");
        assert_eq!(err.domain(), Some(&DomainError::grn_already_posted("GRN already posted")));
    }
}
