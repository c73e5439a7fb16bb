//! Transactional storage.
//!
//! A [`Database`] hands out transactions; a transaction ([`StoreTx`]) is the
//! only way to read or write. Every repository method runs inside the
//! transaction it is called on, row locks are held until commit or rollback,
//! and dropping an uncommitted transaction rolls it back.
//!
//! Lock order for multi-row operations is GRN → purchase order → stock
//! summaries (in line order).

use async_trait::async_trait;

use medstock_auth::{Permission, Role, RolePermission, User};
use medstock_core::{
    BatchId, GrnId, PartyId, ProductId, PurchaseOrderId, RoleId, UserId, WarehouseId,
};
use medstock_inventory::{
    InventoryReason, LedgerEntry, NewLedgerEntry, StockKey, StockSummary, Warehouse,
};
use medstock_parties::Party;
use medstock_products::{Batch, BatchKey, Product};
use medstock_purchasing::{Grn, PurchaseOrder, PurchaseOrderStatus};

use crate::error::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDatabase;
pub use postgres::PostgresDatabase;

pub type StoreResult<T> = Result<T, StoreError>;

/// Source of transactions.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction.
#[async_trait]
pub trait StoreTx:
    MasterDataRepo + InventoryRepo + PurchasingRepo + AccessRepo + ReportRepo + Send
{
    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Master data
// ─────────────────────────────────────────────────────────────────────────────

/// Parties, warehouses, products and batches. `save_*` inserts or replaces
/// by id; uniqueness (warehouse code, SKU, batch triple) is enforced by the
/// backend.
#[async_trait]
pub trait MasterDataRepo: Send {
    async fn get_party(&mut self, id: PartyId) -> StoreResult<Option<Party>>;
    async fn list_parties(&mut self, include_inactive: bool) -> StoreResult<Vec<Party>>;
    async fn save_party(&mut self, party: &Party) -> StoreResult<()>;

    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>>;
    async fn list_warehouses(&mut self, include_inactive: bool) -> StoreResult<Vec<Warehouse>>;
    async fn save_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()>;

    async fn get_product(&mut self, id: ProductId) -> StoreResult<Option<Product>>;
    async fn list_products(&mut self, include_inactive: bool) -> StoreResult<Vec<Product>>;
    async fn save_product(&mut self, product: &Product) -> StoreResult<()>;

    async fn get_batch(&mut self, id: BatchId) -> StoreResult<Option<Batch>>;
    async fn find_batch(&mut self, key: &BatchKey) -> StoreResult<Option<Batch>>;
    async fn list_batches(&mut self, product_id: ProductId) -> StoreResult<Vec<Batch>>;
    async fn insert_batch(&mut self, batch: &Batch) -> StoreResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait InventoryRepo: Send {
    /// Take the exclusive row lock for `key` (whether or not a row exists
    /// yet) and read the current summary.
    async fn lock_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>>;

    /// Unlocked read of the committed (or own staged) summary.
    async fn get_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>>;

    async fn save_stock_summary(&mut self, summary: &StockSummary) -> StoreResult<()>;

    /// Insert-only; the backend assigns the increasing `id`.
    async fn append_ledger(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Purchasing
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait PurchasingRepo: Send {
    /// Insert or replace the order header and all of its lines.
    async fn save_purchase_order(&mut self, po: &PurchaseOrder) -> StoreResult<()>;
    async fn get_purchase_order(&mut self, id: PurchaseOrderId)
    -> StoreResult<Option<PurchaseOrder>>;
    /// Exclusive row lock on the order, then read it with its lines.
    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;
    /// Newest first.
    async fn list_purchase_orders(
        &mut self,
        status: Option<PurchaseOrderStatus>,
    ) -> StoreResult<Vec<PurchaseOrder>>;

    async fn save_grn(&mut self, grn: &Grn) -> StoreResult<()>;
    async fn get_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>>;
    async fn lock_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>>;
    async fn find_grn_by_number(&mut self, grn_number: &str) -> StoreResult<Option<Grn>>;
    /// Newest first.
    async fn list_grns(&mut self, po: Option<PurchaseOrderId>) -> StoreResult<Vec<Grn>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Access control
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait AccessRepo: Send {
    /// Serialize user-management changes (lockout checks read-then-write
    /// across users).
    async fn lock_user_admin(&mut self) -> StoreResult<()>;

    async fn save_permission(&mut self, permission: &Permission) -> StoreResult<()>;
    async fn list_permissions(&mut self) -> StoreResult<Vec<Permission>>;

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>>;
    async fn get_roles(&mut self, ids: &[RoleId]) -> StoreResult<Vec<Role>>;
    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>>;
    async fn list_roles(&mut self) -> StoreResult<Vec<Role>>;
    async fn save_role(&mut self, role: &Role) -> StoreResult<()>;

    /// Replace the permission links of a role.
    async fn set_role_permissions(
        &mut self,
        role_id: RoleId,
        permissions: &[Permission],
    ) -> StoreResult<()>;
    async fn role_permissions(&mut self, role_ids: &[RoleId]) -> StoreResult<Vec<RolePermission>>;

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_external_subject(&mut self, subject: &str)
    -> StoreResult<Option<User>>;
    async fn list_users(&mut self) -> StoreResult<Vec<User>>;
    async fn save_user(&mut self, user: &User) -> StoreResult<()>;

    /// Linked role ids in link order.
    async fn user_role_ids(&mut self, user_id: UserId) -> StoreResult<Vec<RoleId>>;
    /// Replace the role links of a user.
    async fn set_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()>;

    /// Active users that are superusers or reach `user:manage` through their
    /// primary or linked active roles.
    async fn active_user_manager_ids(&mut self) -> StoreResult<Vec<UserId>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting reads
// ─────────────────────────────────────────────────────────────────────────────

/// Narrows which keys' ledger history is read; `None` means any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerScope {
    pub warehouse_id: Option<WarehouseId>,
    pub product_id: Option<ProductId>,
    pub reason: Option<InventoryReason>,
}

#[async_trait]
pub trait ReportRepo: Send {
    /// Ledger rows in `(created_at, id)` order.
    async fn ledger_entries(&mut self, scope: &LedgerScope) -> StoreResult<Vec<LedgerEntry>>;

    async fn list_stock_summaries(
        &mut self,
        warehouse_id: Option<WarehouseId>,
        product_id: Option<ProductId>,
    ) -> StoreResult<Vec<StockSummary>>;
}
