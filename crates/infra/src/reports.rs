//! Read-only reports over committed ledger and purchasing state.
//!
//! Every report runs in its own transaction and rolls it back, so a report
//! never observes a half-applied posting. Running balances are replayed from
//! the full `(created_at, id)` history of each key before any date or
//! direction filter is applied.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use medstock_auth::User;
use medstock_core::{
    BatchId, DomainError, DomainResult, GrnId, PartyId, ProductId, PurchaseOrderId, Quantity,
    UnitCost, UserId, WarehouseId,
};
use medstock_inventory::{
    InventoryReason, LedgerEntry, RunningBalance, StockSummary, TxnType, Warehouse,
    replay_running_balances,
};
use medstock_parties::Party;
use medstock_products::{Batch, Product};
use medstock_purchasing::{Grn, PurchaseOrder, PurchaseOrderStatus};

use crate::error::ServiceResult;
use crate::store::{
    Database, LedgerScope, MasterDataRepo, PurchasingRepo, ReportRepo, StoreResult,
    StoreTx,
};

pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Paging and filters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn validate(&self) -> DomainResult<()> {
        if self.page < 1 {
            return Err(DomainError::validation("page must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(DomainError::validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    /// Matching rows across all pages.
    pub total: usize,
}

pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total = items.len();
    let offset = (request.page.saturating_sub(1) as usize).saturating_mul(request.page_size as usize);
    let items = items
        .into_iter()
        .skip(offset)
        .take(request.page_size as usize)
        .collect();
    Page {
        items,
        page: request.page,
        page_size: request.page_size,
        total,
    }
}

/// Inclusive business-date range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn validate(&self) -> DomainResult<()> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => {
                Err(DomainError::validation("date_from cannot be after date_to"))
            }
            _ => Ok(()),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementDirection {
    Inward,
    Outward,
}

impl MovementDirection {
    pub fn matches(self, entry: &LedgerEntry) -> bool {
        match self {
            MovementDirection::Inward => entry.is_inward(),
            MovementDirection::Outward => entry.is_outward(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementFilter {
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub dates: DateRange,
    #[serde(default)]
    pub direction: Option<MovementDirection>,
    #[serde(default)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInwardFilter {
    /// Matched against the GRN's received date.
    #[serde(default)]
    pub dates: DateRange,
    #[serde(default)]
    pub supplier_id: Option<PartyId>,
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRegisterFilter {
    #[serde(default)]
    pub status: Option<PurchaseOrderStatus>,
    #[serde(default)]
    pub supplier_id: Option<PartyId>,
    /// Case-insensitive substring of the supplier's name.
    #[serde(default)]
    pub supplier_name: Option<String>,
    /// Matched against the order date.
    #[serde(default)]
    pub dates: DateRange,
    #[serde(default)]
    pub page: PageRequest,
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRow {
    pub ledger_id: i64,
    pub created_at: DateTime<Utc>,
    pub txn_type: TxnType,
    pub reason: InventoryReason,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub warehouse_id: WarehouseId,
    pub warehouse_code: Option<String>,
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub product_name: Option<String>,
    pub batch_id: BatchId,
    pub batch_no: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub qty_in: Quantity,
    pub qty_out: Quantity,
    pub running_balance: Quantity,
    pub unit_cost: Option<UnitCost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInwardRow {
    pub ledger_id: i64,
    pub grn_id: GrnId,
    pub grn_number: String,
    pub received_date: NaiveDate,
    pub purchase_order_id: PurchaseOrderId,
    pub po_number: Option<String>,
    pub supplier_id: PartyId,
    pub supplier_name: Option<String>,
    pub warehouse_id: WarehouseId,
    pub warehouse_code: Option<String>,
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub product_name: Option<String>,
    pub batch_id: BatchId,
    pub batch_no: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Billed quantity of the GRN lines for this product and batch.
    pub qty_received: Quantity,
    pub free_qty: Quantity,
    pub unit_cost: Option<UnitCost>,
    /// Unit cost × billed quantity; free goods carry no value.
    pub value: Decimal,
    pub posted_by: Option<UserId>,
    pub posted_by_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRegisterRow {
    pub purchase_order_id: PurchaseOrderId,
    pub po_number: String,
    pub order_date: NaiveDate,
    pub status: PurchaseOrderStatus,
    pub supplier_id: PartyId,
    pub supplier_name: Option<String>,
    pub warehouse_id: WarehouseId,
    pub ordered_qty: Quantity,
    pub received_qty: Quantity,
    pub pending_qty: Quantity,
    /// Σ ordered × unit cost; lines without a cost count as zero.
    pub value: Decimal,
}

impl PurchaseRegisterRow {
    pub fn from_order(po: &PurchaseOrder, supplier_name: Option<String>) -> Self {
        let value = po
            .lines
            .iter()
            .filter_map(|line| line.unit_cost.map(|cost| cost.extend(line.ordered_qty)))
            .sum();
        Self {
            purchase_order_id: po.id,
            po_number: po.po_number.clone(),
            order_date: po.order_date,
            status: po.status,
            supplier_id: po.supplier_id,
            supplier_name,
            warehouse_id: po.warehouse_id,
            ordered_qty: po.total_ordered(),
            received_qty: po.total_received(),
            pending_qty: po.lines.iter().map(|line| line.remaining()).sum(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummaryRow {
    pub warehouse_id: WarehouseId,
    pub warehouse_code: Option<String>,
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub product_name: Option<String>,
    pub batch_id: BatchId,
    pub batch_no: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub qty_on_hand: Quantity,
    pub updated_at: DateTime<Utc>,
}

/// Headline counts for the landing page. Master-data counts include
/// inactive records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_products: usize,
    pub total_parties: usize,
    pub total_warehouses: usize,
    /// Stock keys with a positive balance.
    pub stock_items_count: usize,
}

/// Keep replayed rows that pass the date and direction filters, in ledger order.
pub fn select_movements(
    replayed: Vec<RunningBalance>,
    dates: &DateRange,
    direction: Option<MovementDirection>,
) -> Vec<RunningBalance> {
    replayed
        .into_iter()
        .filter(|row| dates.contains(row.entry.created_at.date_naive()))
        .filter(|row| direction.is_none_or(|d| d.matches(&row.entry)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ReportService<D> {
    db: D,
}

impl<D: Database> ReportService<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), fields(page = filter.page.page, page_size = filter.page.page_size), err)]
    pub async fn stock_movement(
        &self,
        filter: &StockMovementFilter,
    ) -> ServiceResult<Page<StockMovementRow>> {
        filter.page.validate()?;
        filter.dates.validate()?;

        let mut tx = self.db.begin().await?;
        let scope = LedgerScope {
            warehouse_id: filter.warehouse_id,
            product_id: filter.product_id,
            reason: None,
        };
        let history = tx.ledger_entries(&scope).await?;
        let selected = select_movements(
            replay_running_balances(history),
            &filter.dates,
            filter.direction,
        );
        let page = paginate(selected, filter.page);

        let mut lookup = Lookup::default();
        let mut items = Vec::with_capacity(page.items.len());
        for RunningBalance { entry, balance } in page.items {
            let warehouse = lookup.warehouse(&mut tx, entry.warehouse_id).await?;
            let product = lookup.product(&mut tx, entry.product_id).await?;
            let batch = lookup.batch(&mut tx, entry.batch_id).await?;
            let (qty_in, qty_out) = if entry.is_inward() {
                (entry.qty, Quantity::ZERO)
            } else {
                (Quantity::ZERO, -entry.qty)
            };
            items.push(StockMovementRow {
                ledger_id: entry.id,
                created_at: entry.created_at,
                txn_type: entry.txn_type,
                reason: entry.reason,
                ref_type: entry.ref_type,
                ref_id: entry.ref_id,
                warehouse_id: entry.warehouse_id,
                warehouse_code: warehouse.map(|w| w.code),
                product_id: entry.product_id,
                sku: product.as_ref().map(|p| p.sku.clone()),
                product_name: product.map(|p| p.name),
                batch_id: entry.batch_id,
                batch_no: batch.as_ref().map(|b| b.batch_no.clone()),
                expiry_date: batch.map(|b| b.expiry_date),
                qty_in,
                qty_out,
                running_balance: balance,
                unit_cost: entry.unit_cost,
            });
        }
        tx.rollback().await?;

        debug!(total = page.total, returned = items.len(), "stock movement report");
        Ok(Page {
            items,
            page: page.page,
            page_size: page.page_size,
            total: page.total,
        })
    }

    /// Newest receipt first.
    #[instrument(skip(self, filter), fields(page = filter.page.page, page_size = filter.page.page_size), err)]
    pub async fn stock_inward(
        &self,
        filter: &StockInwardFilter,
    ) -> ServiceResult<Page<StockInwardRow>> {
        filter.page.validate()?;
        filter.dates.validate()?;

        let mut tx = self.db.begin().await?;
        let scope = LedgerScope {
            warehouse_id: filter.warehouse_id,
            product_id: filter.product_id,
            reason: Some(InventoryReason::PurchaseGrn),
        };
        let entries = tx.ledger_entries(&scope).await?;

        let mut lookup = Lookup::default();
        let mut matched = Vec::new();
        for entry in entries {
            let Some(grn_number) = entry.ref_id.as_deref() else {
                continue;
            };
            let Some(grn) = lookup.grn(&mut tx, grn_number).await? else {
                continue;
            };
            if filter.dates.contains(grn.received_date)
                && filter.supplier_id.is_none_or(|s| s == grn.supplier_id)
            {
                matched.push((grn, entry));
            }
        }
        matched.sort_by(|(a, x), (b, y)| {
            b.received_date.cmp(&a.received_date).then(y.id.cmp(&x.id))
        });
        let page = paginate(matched, filter.page);

        let mut items = Vec::with_capacity(page.items.len());
        for (grn, entry) in page.items {
            let po = lookup.purchase_order(&mut tx, grn.purchase_order_id).await?;
            let supplier = lookup.party(&mut tx, grn.supplier_id).await?;
            let warehouse = lookup.warehouse(&mut tx, entry.warehouse_id).await?;
            let product = lookup.product(&mut tx, entry.product_id).await?;
            let batch = lookup.batch(&mut tx, entry.batch_id).await?;
            let poster = match grn.posted_by {
                Some(id) => lookup.user(&mut tx, id).await?,
                None => None,
            };

            let (qty_received, free_qty) = grn_quantities(&grn, &entry);
            items.push(StockInwardRow {
                ledger_id: entry.id,
                grn_id: grn.id,
                grn_number: grn.grn_number,
                received_date: grn.received_date,
                purchase_order_id: grn.purchase_order_id,
                po_number: po.map(|po| po.po_number),
                supplier_id: grn.supplier_id,
                supplier_name: supplier.map(|s| s.name),
                warehouse_id: entry.warehouse_id,
                warehouse_code: warehouse.map(|w| w.code),
                product_id: entry.product_id,
                sku: product.as_ref().map(|p| p.sku.clone()),
                product_name: product.map(|p| p.name),
                batch_id: entry.batch_id,
                batch_no: batch.as_ref().map(|b| b.batch_no.clone()),
                expiry_date: batch.map(|b| b.expiry_date),
                qty_received,
                free_qty,
                unit_cost: entry.unit_cost,
                value: entry.unit_cost.map(|c| c.extend(qty_received)).unwrap_or_default(),
                posted_by: grn.posted_by,
                posted_by_name: poster.map(|u| u.full_name.unwrap_or(u.email)),
            });
        }
        tx.rollback().await?;

        debug!(total = page.total, returned = items.len(), "stock inward report");
        Ok(Page {
            items,
            page: page.page,
            page_size: page.page_size,
            total: page.total,
        })
    }

    /// Newest order first.
    #[instrument(skip(self, filter), fields(page = filter.page.page, page_size = filter.page.page_size), err)]
    pub async fn purchase_register(
        &self,
        filter: &PurchaseRegisterFilter,
    ) -> ServiceResult<Page<PurchaseRegisterRow>> {
        filter.page.validate()?;
        filter.dates.validate()?;
        let name_filter = filter
            .supplier_name
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());

        let mut tx = self.db.begin().await?;
        let orders = tx.list_purchase_orders(filter.status).await?;

        let mut lookup = Lookup::default();
        let mut rows = Vec::new();
        for po in orders {
            if !filter.dates.contains(po.order_date)
                || filter.supplier_id.is_some_and(|s| s != po.supplier_id)
            {
                continue;
            }
            let supplier_name = lookup.party(&mut tx, po.supplier_id).await?.map(|s| s.name);
            if let Some(needle) = name_filter.as_deref() {
                let hit = supplier_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(needle));
                if !hit {
                    continue;
                }
            }
            rows.push(PurchaseRegisterRow::from_order(&po, supplier_name));
        }
        tx.rollback().await?;

        rows.sort_by(|a, b| {
            b.order_date
                .cmp(&a.order_date)
                .then(b.purchase_order_id.cmp(&a.purchase_order_id))
        });
        Ok(paginate(rows, filter.page))
    }

    #[instrument(skip(self), err)]
    pub async fn dashboard_metrics(&self) -> ServiceResult<DashboardMetrics> {
        let mut tx = self.db.begin().await?;
        let metrics = DashboardMetrics {
            total_products: tx.list_products(true).await?.len(),
            total_parties: tx.list_parties(true).await?.len(),
            total_warehouses: tx.list_warehouses(true).await?.len(),
            stock_items_count: tx
                .list_stock_summaries(None, None)
                .await?
                .iter()
                .filter(|s| s.qty_on_hand > Quantity::ZERO)
                .count(),
        };
        tx.rollback().await?;
        Ok(metrics)
    }

    pub async fn stock_summary(
        &self,
        warehouse_id: Option<WarehouseId>,
        product_id: Option<ProductId>,
    ) -> ServiceResult<Vec<StockSummaryRow>> {
        let mut tx = self.db.begin().await?;
        let summaries = tx.list_stock_summaries(warehouse_id, product_id).await?;

        let mut lookup = Lookup::default();
        let mut rows = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let StockSummary {
                warehouse_id,
                product_id,
                batch_id,
                qty_on_hand,
                updated_at,
            } = summary;
            let warehouse = lookup.warehouse(&mut tx, warehouse_id).await?;
            let product = lookup.product(&mut tx, product_id).await?;
            let batch = lookup.batch(&mut tx, batch_id).await?;
            rows.push(StockSummaryRow {
                warehouse_id,
                warehouse_code: warehouse.map(|w| w.code),
                product_id,
                sku: product.as_ref().map(|p| p.sku.clone()),
                product_name: product.map(|p| p.name),
                batch_id,
                batch_no: batch.as_ref().map(|b| b.batch_no.clone()),
                expiry_date: batch.map(|b| b.expiry_date),
                qty_on_hand,
                updated_at,
            });
        }
        tx.rollback().await?;
        Ok(rows)
    }
}

/// Billed and free quantity of the GRN's lines for the entry's product and
/// batch; the ledger quantity when no line matches.
fn grn_quantities(grn: &Grn, entry: &LedgerEntry) -> (Quantity, Quantity) {
    let lines: Vec<_> = grn
        .lines
        .iter()
        .filter(|l| l.product_id == entry.product_id && l.batch_id == entry.batch_id)
        .collect();
    if lines.is_empty() {
        return (entry.qty, Quantity::ZERO);
    }
    (
        lines.iter().map(|l| l.received_qty).sum(),
        lines.iter().map(|l| l.free_qty).sum(),
    )
}

/// Per-report memo of referenced master data.
#[derive(Default)]
struct Lookup {
    warehouses: HashMap<WarehouseId, Option<Warehouse>>,
    products: HashMap<ProductId, Option<Product>>,
    batches: HashMap<BatchId, Option<Batch>>,
    parties: HashMap<PartyId, Option<Party>>,
    grns: HashMap<String, Option<Grn>>,
    orders: HashMap<PurchaseOrderId, Option<PurchaseOrder>>,
    users: HashMap<UserId, Option<User>>,
}

impl Lookup {
    async fn warehouse<T: StoreTx>(&mut self, tx: &mut T, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        if !self.warehouses.contains_key(&id) {
            let found = tx.get_warehouse(id).await?;
            self.warehouses.insert(id, found);
        }
        Ok(self.warehouses.get(&id).cloned().flatten())
    }

    async fn product<T: StoreTx>(&mut self, tx: &mut T, id: ProductId) -> StoreResult<Option<Product>> {
        if !self.products.contains_key(&id) {
            let found = tx.get_product(id).await?;
            self.products.insert(id, found);
        }
        Ok(self.products.get(&id).cloned().flatten())
    }

    async fn batch<T: StoreTx>(&mut self, tx: &mut T, id: BatchId) -> StoreResult<Option<Batch>> {
        if !self.batches.contains_key(&id) {
            let found = tx.get_batch(id).await?;
            self.batches.insert(id, found);
        }
        Ok(self.batches.get(&id).cloned().flatten())
    }

    async fn party<T: StoreTx>(&mut self, tx: &mut T, id: PartyId) -> StoreResult<Option<Party>> {
        if !self.parties.contains_key(&id) {
            let found = tx.get_party(id).await?;
            self.parties.insert(id, found);
        }
        Ok(self.parties.get(&id).cloned().flatten())
    }

    async fn grn<T: StoreTx>(&mut self, tx: &mut T, grn_number: &str) -> StoreResult<Option<Grn>> {
        if !self.grns.contains_key(grn_number) {
            let found = tx.find_grn_by_number(grn_number).await?;
            self.grns.insert(grn_number.to_string(), found);
        }
        Ok(self.grns.get(grn_number).cloned().flatten())
    }

    async fn user<T: StoreTx>(&mut self, tx: &mut T, id: UserId) -> StoreResult<Option<User>> {
        if !self.users.contains_key(&id) {
            let found = tx.get_user(id).await?;
            self.users.insert(id, found);
        }
        Ok(self.users.get(&id).cloned().flatten())
    }

    async fn purchase_order<T: StoreTx>(
        &mut self,
        tx: &mut T,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        if !self.orders.contains_key(&id) {
            let found = tx.get_purchase_order(id).await?;
            self.orders.insert(id, found);
        }
        Ok(self.orders.get(&id).cloned().flatten())
    }
}
