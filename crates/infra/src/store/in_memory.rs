//! In-memory database for tests and local runs.
//!
//! Committed tables sit behind one `RwLock`. A transaction stages its writes
//! in a private overlay that its own reads see first; commit checks unique
//! constraints against the merged view and applies the overlay atomically.
//! Row locks are per-key async mutexes held by the transaction until it is
//! committed or dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use medstock_auth::{Permission, Role, RolePermission, User};
use medstock_core::{
    BatchId, Entity, GrnId, PartyId, ProductId, PurchaseOrderId, RoleId, UserId, WarehouseId,
};
use medstock_inventory::{LedgerEntry, NewLedgerEntry, StockKey, StockSummary, Warehouse};
use medstock_parties::Party;
use medstock_products::{Batch, BatchKey, Product};
use medstock_purchasing::{Grn, PurchaseOrder, PurchaseOrderStatus};

use super::{
    AccessRepo, Database, InventoryRepo, LedgerScope, MasterDataRepo, PurchasingRepo, ReportRepo,
    StoreResult, StoreTx,
};
use crate::config::DEFAULT_LOCK_TIMEOUT_MS;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Stock(StockKey),
    PurchaseOrder(PurchaseOrderId),
    Grn(GrnId),
    UserAdmin,
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Stock(key) => write!(f, "stock summary ({key})"),
            LockKey::PurchaseOrder(id) => write!(f, "purchase order {id}"),
            LockKey::Grn(id) => write!(f, "GRN {id}"),
            LockKey::UserAdmin => f.write_str("user administration"),
        }
    }
}

/// Table set, used both for committed state and for a transaction's overlay.
#[derive(Debug, Default)]
struct Tables {
    parties: HashMap<PartyId, Party>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    products: HashMap<ProductId, Product>,
    batches: HashMap<BatchId, Batch>,
    stock: HashMap<StockKey, StockSummary>,
    ledger: Vec<LedgerEntry>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrder>,
    grns: HashMap<GrnId, Grn>,
    permissions: BTreeSet<Permission>,
    roles: HashMap<RoleId, Role>,
    role_permissions: HashMap<RoleId, Vec<Permission>>,
    users: HashMap<UserId, User>,
    user_roles: HashMap<UserId, Vec<RoleId>>,
}

impl Tables {
    fn apply(&mut self, staged: Tables) {
        self.parties.extend(staged.parties);
        self.warehouses.extend(staged.warehouses);
        self.products.extend(staged.products);
        self.batches.extend(staged.batches);
        self.stock.extend(staged.stock);
        self.ledger.extend(staged.ledger);
        self.purchase_orders.extend(staged.purchase_orders);
        self.grns.extend(staged.grns);
        self.permissions.extend(staged.permissions);
        self.roles.extend(staged.roles);
        self.role_permissions.extend(staged.role_permissions);
        self.users.extend(staged.users);
        self.user_roles.extend(staged.user_roles);
    }
}

struct Shared {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
    ledger_seq: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    /// Drop registry entries nobody holds or waits on.
    fn prune_locks<'a>(&self, keys: impl IntoIterator<Item = &'a LockKey>) {
        let Ok(mut registry) = self.locks.lock() else {
            return;
        };
        for key in keys {
            if registry.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                registry.remove(key);
            }
        }
    }
}

/// In-memory [`Database`]. Clones share the same state.
#[derive(Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                ledger_seq: AtomicI64::new(0),
                lock_timeout,
            }),
        }
    }
}

#[cfg(test)]
impl InMemoryDatabase {
    fn registered_locks(&self) -> usize {
        self.shared.locks.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    type Tx = InMemoryTx;

    async fn begin(&self) -> StoreResult<InMemoryTx> {
        Ok(InMemoryTx {
            shared: self.shared.clone(),
            staged: Tables::default(),
            held: HashSet::new(),
            guards: Vec::new(),
        })
    }
}

/// Open in-memory transaction. Dropping it discards the overlay and releases
/// its locks.
pub struct InMemoryTx {
    shared: Arc<Shared>,
    staged: Tables,
    held: HashSet<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.guards.clear();
        self.shared.prune_locks(&self.held);
    }
}

fn row<K: Eq + Hash, V: Clone>(staged: &HashMap<K, V>, committed: &HashMap<K, V>, key: &K) -> Option<V> {
    staged.get(key).or_else(|| committed.get(key)).cloned()
}

/// Stage `entity` under its own id.
fn stage<E: Entity + Clone>(table: &mut HashMap<E::Id, E>, entity: &E) {
    table.insert(*entity.id(), entity.clone());
}

fn merged<'a, K: Eq + Hash, V>(
    staged: &'a HashMap<K, V>,
    committed: &'a HashMap<K, V>,
) -> impl Iterator<Item = (&'a K, &'a V)> {
    committed
        .iter()
        .filter(move |(k, _)| !staged.contains_key(*k))
        .chain(staged.iter())
}

/// Fail when two rows of the merged view share a unique key.
fn ensure_unique<K, V, U>(
    staged: &HashMap<K, V>,
    committed: &HashMap<K, V>,
    constraint: &'static str,
    unique_key: impl Fn(&V) -> Option<U>,
    describe: impl Fn(&U) -> String,
) -> StoreResult<()>
where
    K: Eq + Hash,
    U: Eq + Hash,
{
    if staged.is_empty() {
        return Ok(());
    }
    let mut seen: HashSet<U> = HashSet::new();
    for (_, value) in merged(staged, committed) {
        if let Some(key) = unique_key(value) {
            if seen.contains(&key) {
                return Err(StoreError::UniqueViolation {
                    constraint,
                    detail: describe(&key),
                });
            }
            seen.insert(key);
        }
    }
    Ok(())
}

fn check_constraints(committed: &Tables, staged: &Tables) -> StoreResult<()> {
    ensure_unique(
        &staged.warehouses,
        &committed.warehouses,
        "warehouses_code_key",
        |w| Some(w.code.clone()),
        |code| format!("Warehouse code already exists: {code}"),
    )?;
    ensure_unique(
        &staged.products,
        &committed.products,
        "products_sku_key",
        |p| Some(p.sku.clone()),
        |sku| format!("Product SKU already exists: {sku}"),
    )?;
    ensure_unique(
        &staged.batches,
        &committed.batches,
        "batches_product_batch_expiry_key",
        |b| Some(b.key()),
        |key| {
            format!(
                "Batch already exists: {} expiring {}",
                key.batch_no, key.expiry_date
            )
        },
    )?;
    ensure_unique(
        &staged.purchase_orders,
        &committed.purchase_orders,
        "purchase_orders_po_number_key",
        |po| Some(po.po_number.clone()),
        |n| format!("Purchase order number already exists: {n}"),
    )?;
    ensure_unique(
        &staged.grns,
        &committed.grns,
        "grns_grn_number_key",
        |g| Some(g.grn_number.clone()),
        |n| format!("GRN number already exists: {n}"),
    )?;
    ensure_unique(
        &staged.roles,
        &committed.roles,
        "roles_name_key",
        |r| Some(r.name.as_str().to_string()),
        |n| format!("Role name already exists: {n}"),
    )?;
    ensure_unique(
        &staged.users,
        &committed.users,
        "users_email_key",
        |u| Some(u.email.clone()),
        |_| "Email already exists".to_string(),
    )?;
    ensure_unique(
        &staged.users,
        &committed.users,
        "users_external_subject_key",
        |u| u.external_subject.clone(),
        |_| "External subject is already linked to another user".to_string(),
    )
}

impl InMemoryTx {
    fn committed(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.shared
            .tables
            .read()
            .map_err(|_| StoreError::Poisoned("tables"))
    }

    async fn lock(&mut self, key: LockKey) -> StoreResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        let mutex = {
            let mut registry = self
                .shared
                .locks
                .lock()
                .map_err(|_| StoreError::Poisoned("lock registry"))?;
            registry.entry(key.clone()).or_default().clone()
        };
        let acquired = tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.held.insert(key);
                self.guards.push(guard);
                Ok(())
            }
            Err(_) => {
                self.shared.prune_locks(std::iter::once(&key));
                Err(StoreError::LockTimeout(key.to_string()))
            }
        }
    }

    fn role_grants(&self, committed: &Tables, role_id: &RoleId) -> Vec<Permission> {
        row(&self.staged.role_permissions, &committed.role_permissions, role_id)
            .unwrap_or_default()
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn commit(mut self) -> StoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| StoreError::Poisoned("tables"))?;
        check_constraints(&tables, &staged)?;
        tables.apply(staged);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Master data
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MasterDataRepo for InMemoryTx {
    async fn get_party(&mut self, id: PartyId) -> StoreResult<Option<Party>> {
        Ok(row(&self.staged.parties, &self.committed()?.parties, &id))
    }

    async fn list_parties(&mut self, include_inactive: bool) -> StoreResult<Vec<Party>> {
        let committed = self.committed()?;
        let mut out: Vec<Party> = merged(&self.staged.parties, &committed.parties)
            .map(|(_, p)| p.clone())
            .filter(|p| include_inactive || p.is_active)
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_party(&mut self, party: &Party) -> StoreResult<()> {
        stage(&mut self.staged.parties, party);
        Ok(())
    }

    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        Ok(row(&self.staged.warehouses, &self.committed()?.warehouses, &id))
    }

    async fn list_warehouses(&mut self, include_inactive: bool) -> StoreResult<Vec<Warehouse>> {
        let committed = self.committed()?;
        let mut out: Vec<Warehouse> = merged(&self.staged.warehouses, &committed.warehouses)
            .map(|(_, w)| w.clone())
            .filter(|w| include_inactive || w.is_active)
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn save_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        stage(&mut self.staged.warehouses, warehouse);
        Ok(())
    }

    async fn get_product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(row(&self.staged.products, &self.committed()?.products, &id))
    }

    async fn list_products(&mut self, include_inactive: bool) -> StoreResult<Vec<Product>> {
        let committed = self.committed()?;
        let mut out: Vec<Product> = merged(&self.staged.products, &committed.products)
            .map(|(_, p)| p.clone())
            .filter(|p| include_inactive || p.is_active)
            .collect();
        out.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(out)
    }

    async fn save_product(&mut self, product: &Product) -> StoreResult<()> {
        stage(&mut self.staged.products, product);
        Ok(())
    }

    async fn get_batch(&mut self, id: BatchId) -> StoreResult<Option<Batch>> {
        Ok(row(&self.staged.batches, &self.committed()?.batches, &id))
    }

    async fn find_batch(&mut self, key: &BatchKey) -> StoreResult<Option<Batch>> {
        let committed = self.committed()?;
        Ok(merged(&self.staged.batches, &committed.batches)
            .map(|(_, b)| b)
            .find(|b| b.key() == *key)
            .cloned())
    }

    async fn list_batches(&mut self, product_id: ProductId) -> StoreResult<Vec<Batch>> {
        let committed = self.committed()?;
        let mut out: Vec<Batch> = merged(&self.staged.batches, &committed.batches)
            .map(|(_, b)| b)
            .filter(|b| b.product_id == product_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| a.batch_no.cmp(&b.batch_no))
        });
        Ok(out)
    }

    async fn insert_batch(&mut self, batch: &Batch) -> StoreResult<()> {
        stage(&mut self.staged.batches, batch);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl InventoryRepo for InMemoryTx {
    async fn lock_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>> {
        self.lock(LockKey::Stock(key.clone())).await?;
        Ok(row(&self.staged.stock, &self.committed()?.stock, key))
    }

    async fn get_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>> {
        Ok(row(&self.staged.stock, &self.committed()?.stock, key))
    }

    async fn save_stock_summary(&mut self, summary: &StockSummary) -> StoreResult<()> {
        self.staged.stock.insert(summary.key(), summary.clone());
        Ok(())
    }

    async fn append_ledger(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let id = self.shared.ledger_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = LedgerEntry::from_new(id, entry);
        self.staged.ledger.push(entry.clone());
        Ok(entry)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Purchasing
// ─────────────────────────────────────────────────────────────────────────────

fn newest_po_first(a: &PurchaseOrder, b: &PurchaseOrder) -> core::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.po_number.cmp(&a.po_number))
}

fn newest_grn_first(a: &Grn, b: &Grn) -> core::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.grn_number.cmp(&a.grn_number))
}

#[async_trait]
impl PurchasingRepo for InMemoryTx {
    async fn save_purchase_order(&mut self, po: &PurchaseOrder) -> StoreResult<()> {
        stage(&mut self.staged.purchase_orders, po);
        Ok(())
    }

    async fn get_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        Ok(row(
            &self.staged.purchase_orders,
            &self.committed()?.purchase_orders,
            &id,
        ))
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.lock(LockKey::PurchaseOrder(id)).await?;
        self.get_purchase_order(id).await
    }

    async fn list_purchase_orders(
        &mut self,
        status: Option<PurchaseOrderStatus>,
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let committed = self.committed()?;
        let mut out: Vec<PurchaseOrder> =
            merged(&self.staged.purchase_orders, &committed.purchase_orders)
                .map(|(_, po)| po)
                .filter(|po| status.is_none_or(|s| po.status == s))
                .cloned()
                .collect();
        out.sort_by(newest_po_first);
        Ok(out)
    }

    async fn save_grn(&mut self, grn: &Grn) -> StoreResult<()> {
        stage(&mut self.staged.grns, grn);
        Ok(())
    }

    async fn get_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>> {
        Ok(row(&self.staged.grns, &self.committed()?.grns, &id))
    }

    async fn lock_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>> {
        self.lock(LockKey::Grn(id)).await?;
        self.get_grn(id).await
    }

    async fn find_grn_by_number(&mut self, grn_number: &str) -> StoreResult<Option<Grn>> {
        let committed = self.committed()?;
        Ok(merged(&self.staged.grns, &committed.grns)
            .map(|(_, g)| g)
            .find(|g| g.grn_number == grn_number)
            .cloned())
    }

    async fn list_grns(&mut self, po: Option<PurchaseOrderId>) -> StoreResult<Vec<Grn>> {
        let committed = self.committed()?;
        let mut out: Vec<Grn> = merged(&self.staged.grns, &committed.grns)
            .map(|(_, g)| g)
            .filter(|g| po.is_none_or(|id| g.purchase_order_id == id))
            .cloned()
            .collect();
        out.sort_by(newest_grn_first);
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access control
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AccessRepo for InMemoryTx {
    async fn lock_user_admin(&mut self) -> StoreResult<()> {
        self.lock(LockKey::UserAdmin).await
    }

    async fn save_permission(&mut self, permission: &Permission) -> StoreResult<()> {
        self.staged.permissions.insert(permission.clone());
        Ok(())
    }

    async fn list_permissions(&mut self) -> StoreResult<Vec<Permission>> {
        let committed = self.committed()?;
        let all: BTreeSet<Permission> = committed
            .permissions
            .iter()
            .chain(self.staged.permissions.iter())
            .cloned()
            .collect();
        Ok(all.into_iter().collect())
    }

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(row(&self.staged.roles, &self.committed()?.roles, &id))
    }

    async fn get_roles(&mut self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        let committed = self.committed()?;
        Ok(ids
            .iter()
            .filter_map(|id| row(&self.staged.roles, &committed.roles, id))
            .collect())
    }

    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>> {
        let committed = self.committed()?;
        Ok(merged(&self.staged.roles, &committed.roles)
            .map(|(_, r)| r)
            .find(|r| r.name.as_str() == name)
            .cloned())
    }

    async fn list_roles(&mut self) -> StoreResult<Vec<Role>> {
        let committed = self.committed()?;
        let mut out: Vec<Role> = merged(&self.staged.roles, &committed.roles)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn save_role(&mut self, role: &Role) -> StoreResult<()> {
        stage(&mut self.staged.roles, role);
        Ok(())
    }

    async fn set_role_permissions(
        &mut self,
        role_id: RoleId,
        permissions: &[Permission],
    ) -> StoreResult<()> {
        let mut unique: Vec<Permission> = Vec::with_capacity(permissions.len());
        for p in permissions {
            if !unique.contains(p) {
                unique.push(p.clone());
            }
        }
        self.staged.role_permissions.insert(role_id, unique);
        Ok(())
    }

    async fn role_permissions(&mut self, role_ids: &[RoleId]) -> StoreResult<Vec<RolePermission>> {
        let committed = self.committed()?;
        Ok(role_ids
            .iter()
            .flat_map(|role_id| {
                self.role_grants(&committed, role_id)
                    .into_iter()
                    .map(move |permission| RolePermission {
                        role_id: *role_id,
                        permission,
                    })
            })
            .collect())
    }

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(row(&self.staged.users, &self.committed()?.users, &id))
    }

    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        let committed = self.committed()?;
        Ok(merged(&self.staged.users, &committed.users)
            .map(|(_, u)| u)
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_external_subject(
        &mut self,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        let committed = self.committed()?;
        Ok(merged(&self.staged.users, &committed.users)
            .map(|(_, u)| u)
            .find(|u| u.external_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn list_users(&mut self) -> StoreResult<Vec<User>> {
        let committed = self.committed()?;
        let mut out: Vec<User> = merged(&self.staged.users, &committed.users)
            .map(|(_, u)| u.clone())
            .collect();
        out.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(out)
    }

    async fn save_user(&mut self, user: &User) -> StoreResult<()> {
        stage(&mut self.staged.users, user);
        Ok(())
    }

    async fn user_role_ids(&mut self, user_id: UserId) -> StoreResult<Vec<RoleId>> {
        Ok(row(&self.staged.user_roles, &self.committed()?.user_roles, &user_id).unwrap_or_default())
    }

    async fn set_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()> {
        let mut unique: Vec<RoleId> = Vec::with_capacity(role_ids.len());
        for id in role_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        self.staged.user_roles.insert(user_id, unique);
        Ok(())
    }

    async fn active_user_manager_ids(&mut self) -> StoreResult<Vec<UserId>> {
        let committed = self.committed()?;
        let grants_manage = |role_id: &RoleId| {
            let active = row(&self.staged.roles, &committed.roles, role_id)
                .is_some_and(|r| r.is_active);
            active
                && self
                    .role_grants(&committed, role_id)
                    .contains(&Permission::USER_MANAGE)
        };

        let mut out: Vec<UserId> = merged(&self.staged.users, &committed.users)
            .map(|(_, u)| u)
            .filter(|u| u.is_active)
            .filter(|u| {
                if u.is_superuser {
                    return true;
                }
                let linked = row(&self.staged.user_roles, &committed.user_roles, &u.id)
                    .unwrap_or_default();
                u.primary_role_id.iter().chain(linked.iter()).any(|id| grants_manage(id))
            })
            .map(|u| u.id)
            .collect();
        out.sort();
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting reads
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ReportRepo for InMemoryTx {
    async fn ledger_entries(&mut self, scope: &LedgerScope) -> StoreResult<Vec<LedgerEntry>> {
        let committed = self.committed()?;
        let mut out: Vec<LedgerEntry> = committed
            .ledger
            .iter()
            .chain(self.staged.ledger.iter())
            .filter(|e| scope.warehouse_id.is_none_or(|w| e.warehouse_id == w))
            .filter(|e| scope.product_id.is_none_or(|p| e.product_id == p))
            .filter(|e| scope.reason.is_none_or(|r| e.reason == r))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn list_stock_summaries(
        &mut self,
        warehouse_id: Option<WarehouseId>,
        product_id: Option<ProductId>,
    ) -> StoreResult<Vec<StockSummary>> {
        let committed = self.committed()?;
        let mut out: Vec<StockSummary> = merged(&self.staged.stock, &committed.stock)
            .map(|(_, s)| s)
            .filter(|s| warehouse_id.is_none_or(|w| s.warehouse_id == w))
            .filter(|s| product_id.is_none_or(|p| s.product_id == p))
            .cloned()
            .collect();
        out.sort_by_key(StockSummary::key);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medstock_inventory::NewWarehouse;

    fn warehouse(code: &str) -> Warehouse {
        Warehouse::create(
            WarehouseId::new(),
            NewWarehouse {
                code: code.to_string(),
                name: format!("Warehouse {code}"),
                address: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn staged_writes_are_private_until_commit() {
        let db = InMemoryDatabase::new();
        let w = warehouse("BLR-01");

        let mut writer = db.begin().await.unwrap();
        writer.save_warehouse(&w).await.unwrap();
        assert!(writer.get_warehouse(w.id).await.unwrap().is_some());

        let mut reader = db.begin().await.unwrap();
        assert!(reader.get_warehouse(w.id).await.unwrap().is_none());

        writer.commit().await.unwrap();
        assert!(reader.get_warehouse(w.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let db = InMemoryDatabase::new();
        let w = warehouse("BLR-01");
        {
            let mut tx = db.begin().await.unwrap();
            tx.save_warehouse(&w).await.unwrap();
        }
        let mut tx = db.begin().await.unwrap();
        assert!(tx.get_warehouse(w.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unique_constraints_are_checked_at_commit() {
        let db = InMemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        tx.save_warehouse(&warehouse("BLR-01")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.save_warehouse(&warehouse("BLR-01")).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { constraint: "warehouses_code_key", .. }
        ));
    }

    #[tokio::test]
    async fn row_lock_times_out_while_held() {
        let db = InMemoryDatabase::with_lock_timeout(Duration::from_millis(20));
        let id = PurchaseOrderId::new();

        let mut holder = db.begin().await.unwrap();
        holder.lock_purchase_order(id).await.unwrap();

        let mut waiter = db.begin().await.unwrap();
        let err = waiter.lock_purchase_order(id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        drop(holder);
        assert!(waiter.lock_purchase_order(id).await.is_ok());
    }

    #[tokio::test]
    async fn lock_registry_empties_once_transactions_end() {
        let db = InMemoryDatabase::with_lock_timeout(Duration::from_millis(20));
        let po = PurchaseOrderId::new();

        let mut committed = db.begin().await.unwrap();
        committed.lock_purchase_order(po).await.unwrap();
        committed.lock_grn(GrnId::new()).await.unwrap();
        assert_eq!(db.registered_locks(), 2);

        let mut timed_out = db.begin().await.unwrap();
        assert!(timed_out.lock_grn(GrnId::new()).await.is_ok());
        assert!(timed_out.lock_purchase_order(po).await.is_err());
        assert_eq!(db.registered_locks(), 3);

        committed.commit().await.unwrap();
        assert_eq!(db.registered_locks(), 1);

        timed_out.rollback().await.unwrap();
        assert_eq!(db.registered_locks(), 0);
    }

    #[tokio::test]
    async fn relocking_within_one_transaction_is_a_no_op() {
        let db = InMemoryDatabase::with_lock_timeout(Duration::from_millis(20));
        let id = GrnId::new();
        let mut tx = db.begin().await.unwrap();
        tx.lock_grn(id).await.unwrap();
        tx.lock_grn(id).await.unwrap();
    }
}
