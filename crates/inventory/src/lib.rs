//! Inventory domain: warehouses, the append-only stock ledger and the
//! per-(warehouse, product, batch) stock summary.
//!
//! This crate contains the business rules for stock movements, implemented
//! purely as deterministic domain logic (no IO, no locking, no storage). The
//! transactional Stock Engine that applies them lives in `medstock-infra`.

pub mod ledger;
pub mod stock;
pub mod warehouse;

pub use ledger::{
    InventoryReason, LedgerEntry, NewLedgerEntry, RunningBalance, StockRef, TxnType,
    replay_running_balances,
};
pub use stock::{Movement, Posting, StockKey, StockSummary};
pub use warehouse::{NewWarehouse, UpdateWarehouse, Warehouse};
