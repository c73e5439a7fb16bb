//! `medstock-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the error taxonomy shared by every module, strongly-typed identifiers and the
//! fixed-scale decimal types used for stock quantities and unit costs.

pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, StatusClass};
pub use id::{
    BatchId, GrnId, GrnLineId, PartyId, ProductId, PurchaseOrderId, PurchaseOrderLineId, RoleId,
    UserId, WarehouseId,
};
pub use quantity::{COST_SCALE, QTY_SCALE, Quantity, UnitCost};
