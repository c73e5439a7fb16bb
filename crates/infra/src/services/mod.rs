//! Transactional services.
//!
//! Each operation comes in two forms: a method on the service that opens a
//! transaction, runs the operation and commits; and a free `*_in` function
//! that runs inside a caller-owned transaction and leaves committing to the
//! caller. An error from either form drops the transaction, which rolls back
//! every write the operation made.

pub mod master_data;
pub mod purchasing;
pub mod rbac_seed;
pub mod stock;
pub mod users;

pub use master_data::MasterDataService;
pub use purchasing::{PostedGrn, PurchasingService};
pub use rbac_seed::{RbacSeedSummary, ensure_admin_user, seed_rbac};
pub use stock::{StockEngine, StockMovementRequest, StockPosting};
pub use users::UserAdminService;
