//! Infrastructure layer: configuration, transactional storage and the
//! services that run the domain rules against it.
//!
//! The domain crates stay pure; everything here is about *where* state lives
//! and *which transaction* a rule runs in.

pub mod config;
pub mod error;
pub mod reports;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use error::{ServiceError, ServiceResult, StoreError};
pub use reports::ReportService;
pub use services::{MasterDataService, PurchasingService, StockEngine, UserAdminService};
pub use store::{Database, InMemoryDatabase, PostgresDatabase, StoreTx};

#[cfg(test)]
mod integration_tests;
