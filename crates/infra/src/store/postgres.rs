//! Postgres-backed storage.
//!
//! Every [`PostgresTx`] is one database transaction. Row locks are
//! `SELECT ... FOR UPDATE`, bounded by `SET LOCAL lock_timeout`; a timed-out
//! wait surfaces as [`StoreError::LockTimeout`]. Enums are stored as their
//! text codes and quantities as `NUMERIC`.
//!
//! ## Error mapping
//!
//! | SQLSTATE | StoreError |
//! |----------|------------|
//! | `23505` (unique violation) | `UniqueViolation` |
//! | `55P03` (lock not available) | `LockTimeout` |
//! | anything else | `Database` |

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use medstock_auth::{Permission, Role, RoleName, RolePermission, User};
use medstock_core::{
    BatchId, GrnId, GrnLineId, PartyId, ProductId, PurchaseOrderId, PurchaseOrderLineId,
    Quantity, RoleId, UnitCost, UserId, WarehouseId,
};
use medstock_inventory::{LedgerEntry, NewLedgerEntry, StockKey, StockSummary, Warehouse};
use medstock_parties::{ContactInfo, Party};
use medstock_products::{Batch, BatchKey, Product};
use medstock_purchasing::{Grn, GrnLine, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};

use super::{
    AccessRepo, Database, InventoryRepo, LedgerScope, MasterDataRepo, PurchasingRepo, ReportRepo,
    StoreResult, StoreTx,
};
use crate::error::StoreError;

const SCHEMA: &str = include_str!("../../migrations/0001_schema.sql");

/// Advisory lock key serializing user-administration changes.
const USER_ADMIN_LOCK_KEY: i64 = 0x6d65_6473_7573_6572;

#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    #[instrument(skip(url), err)]
    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create missing tables and indexes.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    type Tx = PostgresTx;

    async fn begin(&self) -> StoreResult<PostgresTx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(PostgresTx { tx })
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping and row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                let (constraint, detail) = unique_detail(db_err.constraint());
                return StoreError::UniqueViolation {
                    constraint,
                    detail: detail.to_string(),
                };
            }
            Some("55P03") => return StoreError::LockTimeout(operation.to_string()),
            _ => {}
        }
    }
    StoreError::Database {
        operation,
        source: err,
    }
}

fn unique_detail(constraint: Option<&str>) -> (&'static str, &'static str) {
    match constraint {
        Some("warehouses_code_key") => ("warehouses_code_key", "Warehouse code already exists"),
        Some("products_sku_key") => ("products_sku_key", "Product SKU already exists"),
        Some("batches_product_batch_expiry_key") => (
            "batches_product_batch_expiry_key",
            "Batch already exists for this product and expiry",
        ),
        Some("purchase_orders_po_number_key") => (
            "purchase_orders_po_number_key",
            "Purchase order number already exists",
        ),
        Some("grns_grn_number_key") => ("grns_grn_number_key", "GRN number already exists"),
        Some("roles_name_key") => ("roles_name_key", "Role name already exists"),
        Some("users_email_key") => ("users_email_key", "Email already exists"),
        Some("users_external_subject_key") => (
            "users_external_subject_key",
            "External subject is already linked to another user",
        ),
        _ => ("unknown", "Record already exists"),
    }
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(StoreError::decode)
}

fn parse<T>(raw: String) -> StoreResult<T>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.parse().map_err(StoreError::decode)
}

fn qty(row: &PgRow, name: &str) -> StoreResult<Quantity> {
    Quantity::new(col::<Decimal>(row, name)?).map_err(StoreError::decode)
}

fn cost(row: &PgRow, name: &str) -> StoreResult<Option<UnitCost>> {
    col::<Option<Decimal>>(row, name)?
        .map(UnitCost::new)
        .transpose()
        .map_err(StoreError::decode)
}

fn uuids<I: IntoIterator<Item = Uuid>>(ids: I) -> Vec<Uuid> {
    ids.into_iter().collect()
}

fn party_from_row(row: &PgRow) -> StoreResult<Party> {
    Ok(Party {
        id: PartyId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
        party_type: parse(col(row, "party_type")?)?,
        contact: ContactInfo {
            phone: col(row, "phone")?,
            email: col(row, "email")?,
            address: col(row, "address")?,
        },
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn warehouse_from_row(row: &PgRow) -> StoreResult<Warehouse> {
    Ok(Warehouse {
        id: WarehouseId::from_uuid(col(row, "id")?),
        code: col(row, "code")?,
        name: col(row, "name")?,
        address: col(row, "address")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: ProductId::from_uuid(col(row, "id")?),
        sku: col(row, "sku")?,
        name: col(row, "name")?,
        brand: col(row, "brand")?,
        uom: col(row, "uom")?,
        barcode: col(row, "barcode")?,
        hsn: col(row, "hsn")?,
        gst_rate: col(row, "gst_rate")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> StoreResult<Batch> {
    Ok(Batch {
        id: BatchId::from_uuid(col(row, "id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        batch_no: col(row, "batch_no")?,
        expiry_date: col(row, "expiry_date")?,
        mfg_date: col(row, "mfg_date")?,
        mrp: col(row, "mrp")?,
    })
}

fn summary_from_row(row: &PgRow) -> StoreResult<StockSummary> {
    Ok(StockSummary {
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        batch_id: BatchId::from_uuid(col(row, "batch_id")?),
        qty_on_hand: qty(row, "qty_on_hand")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn ledger_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: col(row, "id")?,
        txn_type: parse(col(row, "txn_type")?)?,
        reason: parse(col(row, "reason")?)?,
        ref_type: col(row, "ref_type")?,
        ref_id: col(row, "ref_id")?,
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        batch_id: BatchId::from_uuid(col(row, "batch_id")?),
        qty: qty(row, "qty")?,
        unit_cost: cost(row, "unit_cost")?,
        created_by: UserId::from_uuid(col(row, "created_by")?),
        created_at: col(row, "created_at")?,
    })
}

fn po_from_row(row: &PgRow) -> StoreResult<PurchaseOrder> {
    Ok(PurchaseOrder {
        id: PurchaseOrderId::from_uuid(col(row, "id")?),
        po_number: col(row, "po_number")?,
        supplier_id: PartyId::from_uuid(col(row, "supplier_id")?),
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        status: parse(col(row, "status")?)?,
        order_date: col(row, "order_date")?,
        expected_date: col(row, "expected_date")?,
        notes: col(row, "notes")?,
        created_by: UserId::from_uuid(col(row, "created_by")?),
        approved_by: col::<Option<Uuid>>(row, "approved_by")?.map(UserId::from_uuid),
        cancelled_by: col::<Option<Uuid>>(row, "cancelled_by")?.map(UserId::from_uuid),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
        lines: Vec::new(),
    })
}

fn po_line_from_row(row: &PgRow) -> StoreResult<PurchaseOrderLine> {
    Ok(PurchaseOrderLine {
        id: PurchaseOrderLineId::from_uuid(col(row, "id")?),
        purchase_order_id: PurchaseOrderId::from_uuid(col(row, "purchase_order_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        ordered_qty: qty(row, "ordered_qty")?,
        received_qty: qty(row, "received_qty")?,
        free_qty: qty(row, "free_qty")?,
        unit_cost: cost(row, "unit_cost")?,
        line_notes: col(row, "line_notes")?,
    })
}

fn grn_from_row(row: &PgRow) -> StoreResult<Grn> {
    Ok(Grn {
        id: GrnId::from_uuid(col(row, "id")?),
        grn_number: col(row, "grn_number")?,
        purchase_order_id: PurchaseOrderId::from_uuid(col(row, "purchase_order_id")?),
        supplier_id: PartyId::from_uuid(col(row, "supplier_id")?),
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        status: parse(col(row, "status")?)?,
        received_date: col(row, "received_date")?,
        posted_at: col(row, "posted_at")?,
        posted_by: col::<Option<Uuid>>(row, "posted_by")?.map(UserId::from_uuid),
        cancelled_by: col::<Option<Uuid>>(row, "cancelled_by")?.map(UserId::from_uuid),
        created_by: UserId::from_uuid(col(row, "created_by")?),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
        lines: Vec::new(),
    })
}

fn grn_line_from_row(row: &PgRow) -> StoreResult<GrnLine> {
    Ok(GrnLine {
        id: GrnLineId::from_uuid(col(row, "id")?),
        grn_id: GrnId::from_uuid(col(row, "grn_id")?),
        po_line_id: PurchaseOrderLineId::from_uuid(col(row, "po_line_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        batch_id: BatchId::from_uuid(col(row, "batch_id")?),
        received_qty: qty(row, "received_qty")?,
        free_qty: qty(row, "free_qty")?,
        unit_cost: cost(row, "unit_cost")?,
        expiry_date: col(row, "expiry_date")?,
    })
}

fn role_from_row(row: &PgRow) -> StoreResult<Role> {
    Ok(Role {
        id: RoleId::from_uuid(col(row, "id")?),
        name: RoleName::new(col::<String>(row, "name")?).map_err(StoreError::decode)?,
        description: col(row, "description")?,
        is_system: col(row, "is_system")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: UserId::from_uuid(col(row, "id")?),
        email: col(row, "email")?,
        full_name: col(row, "full_name")?,
        auth_provider: parse(col(row, "auth_provider")?)?,
        external_subject: col(row, "external_subject")?,
        organization_slug: col(row, "organization_slug")?,
        is_active: col(row, "is_active")?,
        is_superuser: col(row, "is_superuser")?,
        primary_role_id: col::<Option<Uuid>>(row, "primary_role_id")?.map(RoleId::from_uuid),
        last_login_at: col(row, "last_login_at")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn decode_all<T>(rows: &[PgRow], decode: fn(&PgRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

const PARTY_COLUMNS: &str =
    "id, name, party_type, phone, email, address, is_active, created_at, updated_at";
const WAREHOUSE_COLUMNS: &str = "id, code, name, address, is_active, created_at, updated_at";
const PRODUCT_COLUMNS: &str =
    "id, sku, name, brand, uom, barcode, hsn, gst_rate, is_active, created_at, updated_at";
const BATCH_COLUMNS: &str = "id, product_id, batch_no, expiry_date, mfg_date, mrp";
const SUMMARY_COLUMNS: &str = "warehouse_id, product_id, batch_id, qty_on_hand, updated_at";
const PO_COLUMNS: &str = "id, po_number, supplier_id, warehouse_id, status, order_date, \
     expected_date, notes, created_by, approved_by, cancelled_by, created_at, updated_at";
const GRN_COLUMNS: &str = "id, grn_number, purchase_order_id, supplier_id, warehouse_id, status, \
     received_date, posted_at, posted_by, cancelled_by, created_by, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, is_system, is_active, created_at";
const USER_COLUMNS: &str = "id, email, full_name, auth_provider, external_subject, \
     organization_slug, is_active, is_superuser, primary_role_id, last_login_at, created_at, \
     updated_at";

impl PostgresTx {
    async fn attach_po_lines(&mut self, mut orders: Vec<PurchaseOrder>) -> StoreResult<Vec<PurchaseOrder>> {
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids = uuids(orders.iter().map(|po| *po.id.as_uuid()));
        let rows = sqlx::query(
            r#"
            SELECT id, purchase_order_id, product_id, ordered_qty, received_qty, free_qty,
                   unit_cost, line_notes
            FROM purchase_order_lines
            WHERE purchase_order_id = ANY($1)
            ORDER BY purchase_order_id, line_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_purchase_order_lines", e))?;

        let mut by_order: HashMap<PurchaseOrderId, Vec<PurchaseOrderLine>> = HashMap::new();
        for row in &rows {
            let line = po_line_from_row(row)?;
            by_order.entry(line.purchase_order_id).or_default().push(line);
        }
        for po in &mut orders {
            po.lines = by_order.remove(&po.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn attach_grn_lines(&mut self, mut grns: Vec<Grn>) -> StoreResult<Vec<Grn>> {
        if grns.is_empty() {
            return Ok(grns);
        }
        let ids = uuids(grns.iter().map(|g| *g.id.as_uuid()));
        let rows = sqlx::query(
            r#"
            SELECT id, grn_id, po_line_id, product_id, batch_id, received_qty, free_qty,
                   unit_cost, expiry_date
            FROM grn_lines
            WHERE grn_id = ANY($1)
            ORDER BY grn_id, line_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_grn_lines", e))?;

        let mut by_grn: HashMap<GrnId, Vec<GrnLine>> = HashMap::new();
        for row in &rows {
            let line = grn_line_from_row(row)?;
            by_grn.entry(line.grn_id).or_default().push(line);
        }
        for grn in &mut grns {
            grn.lines = by_grn.remove(&grn.id).unwrap_or_default();
        }
        Ok(grns)
    }

    async fn fetch_po(&mut self, id: PurchaseOrderId, for_update: bool) -> StoreResult<Option<PurchaseOrder>> {
        let sql = format!(
            "SELECT {PO_COLUMNS} FROM purchase_orders WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_purchase_order", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let po = po_from_row(&row)?;
        Ok(self.attach_po_lines(vec![po]).await?.pop())
    }

    async fn fetch_grn(&mut self, id: GrnId, for_update: bool) -> StoreResult<Option<Grn>> {
        let sql = format!(
            "SELECT {GRN_COLUMNS} FROM grns WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_grn", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let grn = grn_from_row(&row)?;
        Ok(self.attach_grn_lines(vec![grn]).await?.pop())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Master data
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MasterDataRepo for PostgresTx {
    async fn get_party(&mut self, id: PartyId) -> StoreResult<Option<Party>> {
        let sql = format!("SELECT {PARTY_COLUMNS} FROM parties WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_party", e))?
            .as_ref()
            .map(party_from_row)
            .transpose()
    }

    async fn list_parties(&mut self, include_inactive: bool) -> StoreResult<Vec<Party>> {
        let sql = format!(
            "SELECT {PARTY_COLUMNS} FROM parties WHERE ($1 OR is_active) ORDER BY name, id"
        );
        let rows = sqlx::query(&sql)
            .bind(include_inactive)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_parties", e))?;
        decode_all(&rows, party_from_row)
    }

    async fn save_party(&mut self, party: &Party) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parties (id, name, party_type, phone, email, address, is_active,
                                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                party_type = EXCLUDED.party_type,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email,
                address = EXCLUDED.address,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(party.id.as_uuid())
        .bind(&party.name)
        .bind(party.party_type.as_str())
        .bind(&party.contact.phone)
        .bind(&party.contact.email)
        .bind(&party.contact.address)
        .bind(party.is_active)
        .bind(party.created_at)
        .bind(party.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_party", e))?;
        Ok(())
    }

    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        let sql = format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse", e))?
            .as_ref()
            .map(warehouse_from_row)
            .transpose()
    }

    async fn list_warehouses(&mut self, include_inactive: bool) -> StoreResult<Vec<Warehouse>> {
        let sql = format!(
            "SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE ($1 OR is_active) ORDER BY code"
        );
        let rows = sqlx::query(&sql)
            .bind(include_inactive)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        decode_all(&rows, warehouse_from_row)
    }

    async fn save_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, code, name, address, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                name = EXCLUDED.name,
                address = EXCLUDED.address,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.code)
        .bind(&warehouse.name)
        .bind(&warehouse.address)
        .bind(warehouse.is_active)
        .bind(warehouse.created_at)
        .bind(warehouse.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_warehouse", e))?;
        Ok(())
    }

    async fn get_product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?
            .as_ref()
            .map(product_from_row)
            .transpose()
    }

    async fn list_products(&mut self, include_inactive: bool) -> StoreResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE ($1 OR is_active) ORDER BY sku"
        );
        let rows = sqlx::query(&sql)
            .bind(include_inactive)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        decode_all(&rows, product_from_row)
    }

    async fn save_product(&mut self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, brand, uom, barcode, hsn, gst_rate, is_active,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                brand = EXCLUDED.brand,
                uom = EXCLUDED.uom,
                barcode = EXCLUDED.barcode,
                hsn = EXCLUDED.hsn,
                gst_rate = EXCLUDED.gst_rate,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.uom)
        .bind(&product.barcode)
        .bind(&product.hsn)
        .bind(product.gst_rate)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;
        Ok(())
    }

    async fn get_batch(&mut self, id: BatchId) -> StoreResult<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_batch", e))?
            .as_ref()
            .map(batch_from_row)
            .transpose()
    }

    async fn find_batch(&mut self, key: &BatchKey) -> StoreResult<Option<Batch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE product_id = $1 AND batch_no = $2 AND expiry_date = $3"
        );
        sqlx::query(&sql)
            .bind(key.product_id.as_uuid())
            .bind(&key.batch_no)
            .bind(key.expiry_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_batch", e))?
            .as_ref()
            .map(batch_from_row)
            .transpose()
    }

    async fn list_batches(&mut self, product_id: ProductId) -> StoreResult<Vec<Batch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE product_id = $1 \
             ORDER BY expiry_date, batch_no"
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_batches", e))?;
        decode_all(&rows, batch_from_row)
    }

    async fn insert_batch(&mut self, batch: &Batch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, product_id, batch_no, expiry_date, mfg_date, mrp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(batch.product_id.as_uuid())
        .bind(&batch.batch_no)
        .bind(batch.expiry_date)
        .bind(batch.mfg_date)
        .bind(batch.mrp)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_batch", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl InventoryRepo for PostgresTx {
    /// Inserting a zero placeholder row first gives a row to lock even for a
    /// key that has never held stock. A returned row means it did not exist.
    #[instrument(skip(self), fields(key = %key), err)]
    async fn lock_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_summary (warehouse_id, product_id, batch_id, qty_on_hand, updated_at)
            VALUES ($1, $2, $3, 0, now())
            ON CONFLICT (warehouse_id, product_id, batch_id) DO NOTHING
            RETURNING warehouse_id
            "#,
        )
        .bind(key.warehouse_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.batch_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock_summary", e))?;
        if inserted.is_some() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM stock_summary \
             WHERE warehouse_id = $1 AND product_id = $2 AND batch_id = $3 FOR UPDATE"
        );
        sqlx::query(&sql)
            .bind(key.warehouse_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.batch_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_stock_summary", e))?
            .as_ref()
            .map(summary_from_row)
            .transpose()
    }

    async fn get_stock_summary(&mut self, key: &StockKey) -> StoreResult<Option<StockSummary>> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM stock_summary \
             WHERE warehouse_id = $1 AND product_id = $2 AND batch_id = $3"
        );
        sqlx::query(&sql)
            .bind(key.warehouse_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.batch_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_stock_summary", e))?
            .as_ref()
            .map(summary_from_row)
            .transpose()
    }

    async fn save_stock_summary(&mut self, summary: &StockSummary) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_summary (warehouse_id, product_id, batch_id, qty_on_hand, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (warehouse_id, product_id, batch_id) DO UPDATE SET
                qty_on_hand = EXCLUDED.qty_on_hand,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(summary.warehouse_id.as_uuid())
        .bind(summary.product_id.as_uuid())
        .bind(summary.batch_id.as_uuid())
        .bind(summary.qty_on_hand.value())
        .bind(summary.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_stock_summary", e))?;
        Ok(())
    }

    async fn append_ledger(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let (ref_type, ref_id) = match &entry.reference {
            Some(r) => (Some(r.ref_type.as_str()), Some(r.ref_id.as_str())),
            None => (None, None),
        };
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO inventory_ledger (txn_type, reason, ref_type, ref_id, warehouse_id,
                                          product_id, batch_id, qty, unit_cost, created_by,
                                          created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(entry.txn_type.as_str())
        .bind(entry.reason.as_str())
        .bind(ref_type)
        .bind(ref_id)
        .bind(entry.key.warehouse_id.as_uuid())
        .bind(entry.key.product_id.as_uuid())
        .bind(entry.key.batch_id.as_uuid())
        .bind(entry.qty.value())
        .bind(entry.unit_cost.map(|c| c.value()))
        .bind(entry.created_by.as_uuid())
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_ledger", e))
        .and_then(|row| col(&row, "id"))?;
        Ok(LedgerEntry::from_new(id, entry))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Purchasing
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PurchasingRepo for PostgresTx {
    async fn save_purchase_order(&mut self, po: &PurchaseOrder) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (id, po_number, supplier_id, warehouse_id, status,
                                         order_date, expected_date, notes, created_by,
                                         approved_by, cancelled_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                approved_by = EXCLUDED.approved_by,
                cancelled_by = EXCLUDED.cancelled_by,
                expected_date = EXCLUDED.expected_date,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(po.id.as_uuid())
        .bind(&po.po_number)
        .bind(po.supplier_id.as_uuid())
        .bind(po.warehouse_id.as_uuid())
        .bind(po.status.as_str())
        .bind(po.order_date)
        .bind(po.expected_date)
        .bind(&po.notes)
        .bind(po.created_by.as_uuid())
        .bind(po.approved_by.map(|u| *u.as_uuid()))
        .bind(po.cancelled_by.map(|u| *u.as_uuid()))
        .bind(po.created_at)
        .bind(po.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_purchase_order", e))?;

        for (line_no, line) in po.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_lines (id, purchase_order_id, line_no, product_id,
                                                  ordered_qty, received_qty, free_qty,
                                                  unit_cost, line_notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    received_qty = EXCLUDED.received_qty,
                    free_qty = EXCLUDED.free_qty,
                    unit_cost = EXCLUDED.unit_cost,
                    line_notes = EXCLUDED.line_notes
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(po.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_uuid())
            .bind(line.ordered_qty.value())
            .bind(line.received_qty.value())
            .bind(line.free_qty.value())
            .bind(line.unit_cost.map(|c| c.value()))
            .bind(&line.line_notes)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_purchase_order_line", e))?;
        }
        Ok(())
    }

    async fn get_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.fetch_po(id, false).await
    }

    #[instrument(skip(self), fields(po_id = %id), err)]
    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.fetch_po(id, true).await
    }

    async fn list_purchase_orders(
        &mut self,
        status: Option<PurchaseOrderStatus>,
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let sql = format!(
            "SELECT {PO_COLUMNS} FROM purchase_orders \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, po_number DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_purchase_orders", e))?;
        let orders = decode_all(&rows, po_from_row)?;
        self.attach_po_lines(orders).await
    }

    async fn save_grn(&mut self, grn: &Grn) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grns (id, grn_number, purchase_order_id, supplier_id, warehouse_id,
                              status, received_date, posted_at, posted_by, cancelled_by,
                              created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                posted_at = EXCLUDED.posted_at,
                posted_by = EXCLUDED.posted_by,
                cancelled_by = EXCLUDED.cancelled_by,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(grn.id.as_uuid())
        .bind(&grn.grn_number)
        .bind(grn.purchase_order_id.as_uuid())
        .bind(grn.supplier_id.as_uuid())
        .bind(grn.warehouse_id.as_uuid())
        .bind(grn.status.as_str())
        .bind(grn.received_date)
        .bind(grn.posted_at)
        .bind(grn.posted_by.map(|u| *u.as_uuid()))
        .bind(grn.cancelled_by.map(|u| *u.as_uuid()))
        .bind(grn.created_by.as_uuid())
        .bind(grn.created_at)
        .bind(grn.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_grn", e))?;

        for (line_no, line) in grn.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO grn_lines (id, grn_id, line_no, po_line_id, product_id, batch_id,
                                       received_qty, free_qty, unit_cost, expiry_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(grn.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.po_line_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(line.batch_id.as_uuid())
            .bind(line.received_qty.value())
            .bind(line.free_qty.value())
            .bind(line.unit_cost.map(|c| c.value()))
            .bind(line.expiry_date)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_grn_line", e))?;
        }
        Ok(())
    }

    async fn get_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>> {
        self.fetch_grn(id, false).await
    }

    #[instrument(skip(self), fields(grn_id = %id), err)]
    async fn lock_grn(&mut self, id: GrnId) -> StoreResult<Option<Grn>> {
        self.fetch_grn(id, true).await
    }

    async fn find_grn_by_number(&mut self, grn_number: &str) -> StoreResult<Option<Grn>> {
        let sql = format!("SELECT {GRN_COLUMNS} FROM grns WHERE grn_number = $1");
        let row = sqlx::query(&sql)
            .bind(grn_number)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_grn_by_number", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let grn = grn_from_row(&row)?;
        Ok(self.attach_grn_lines(vec![grn]).await?.pop())
    }

    async fn list_grns(&mut self, po: Option<PurchaseOrderId>) -> StoreResult<Vec<Grn>> {
        let sql = format!(
            "SELECT {GRN_COLUMNS} FROM grns \
             WHERE ($1::uuid IS NULL OR purchase_order_id = $1) \
             ORDER BY created_at DESC, grn_number DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(po.map(|id| *id.as_uuid()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_grns", e))?;
        let grns = decode_all(&rows, grn_from_row)?;
        self.attach_grn_lines(grns).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access control
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AccessRepo for PostgresTx {
    async fn lock_user_admin(&mut self) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(USER_ADMIN_LOCK_KEY)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user_admin", e))?;
        Ok(())
    }

    async fn save_permission(&mut self, permission: &Permission) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (code, module, action)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(permission.as_str())
        .bind(permission.module())
        .bind(permission.action())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_permission", e))?;
        Ok(())
    }

    async fn list_permissions(&mut self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query("SELECT code FROM permissions ORDER BY code")
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter()
            .map(|row| col::<String>(row, "code").map(Permission::new))
            .collect()
    }

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?
            .as_ref()
            .map(role_from_row)
            .transpose()
    }

    async fn get_roles(&mut self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(uuids(ids.iter().map(|id| *id.as_uuid())))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_roles", e))?;
        let mut found: HashMap<RoleId, Role> = decode_all(&rows, role_from_row)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1");
        sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?
            .as_ref()
            .map(role_from_row)
            .transpose()
    }

    async fn list_roles(&mut self) -> StoreResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        decode_all(&rows, role_from_row)
    }

    async fn save_role(&mut self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, is_system, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                is_system = EXCLUDED.is_system,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.name.as_str())
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.is_active)
        .bind(role.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_role", e))?;
        Ok(())
    }

    async fn set_role_permissions(
        &mut self,
        role_id: RoleId,
        permissions: &[Permission],
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_role_permissions", e))?;
        for permission in permissions {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_code)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(role_id.as_uuid())
            .bind(permission.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        }
        Ok(())
    }

    async fn role_permissions(&mut self, role_ids: &[RoleId]) -> StoreResult<Vec<RolePermission>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT role_id, permission_code
            FROM role_permissions
            WHERE role_id = ANY($1)
            ORDER BY role_id, permission_code
            "#,
        )
        .bind(uuids(role_ids.iter().map(|id| *id.as_uuid())))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("role_permissions", e))?;
        rows.iter()
            .map(|row| {
                Ok(RolePermission {
                    role_id: RoleId::from_uuid(col(row, "role_id")?),
                    permission: Permission::new(col::<String>(row, "permission_code")?),
                })
            })
            .collect()
    }

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = lower(trim($1))");
        sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn find_user_by_external_subject(
        &mut self,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_subject = $1");
        sqlx::query(&sql)
            .bind(subject)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_external_subject", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn list_users(&mut self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY email");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        decode_all(&rows, user_from_row)
    }

    async fn save_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, auth_provider, external_subject,
                               organization_slug, is_active, is_superuser, primary_role_id,
                               last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                full_name = EXCLUDED.full_name,
                auth_provider = EXCLUDED.auth_provider,
                external_subject = EXCLUDED.external_subject,
                organization_slug = EXCLUDED.organization_slug,
                is_active = EXCLUDED.is_active,
                is_superuser = EXCLUDED.is_superuser,
                primary_role_id = EXCLUDED.primary_role_id,
                last_login_at = EXCLUDED.last_login_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.auth_provider.as_str())
        .bind(&user.external_subject)
        .bind(&user.organization_slug)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.primary_role_id.map(|r| *r.as_uuid()))
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_user", e))?;
        Ok(())
    }

    async fn user_role_ids(&mut self, user_id: UserId) -> StoreResult<Vec<RoleId>> {
        let rows = sqlx::query("SELECT role_id FROM user_roles WHERE user_id = $1 ORDER BY position")
            .bind(user_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("user_role_ids", e))?;
        rows.iter()
            .map(|row| col(row, "role_id").map(RoleId::from_uuid))
            .collect()
    }

    async fn set_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_user_roles", e))?;
        for (position, role_id) in role_ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role_id, position)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_user_roles", e))?;
        }
        Ok(())
    }

    async fn active_user_manager_ids(&mut self) -> StoreResult<Vec<UserId>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id
            FROM users u
            WHERE u.is_active
              AND (
                u.is_superuser
                OR EXISTS (
                    SELECT 1
                    FROM roles r
                    JOIN role_permissions rp ON rp.role_id = r.id
                    WHERE r.is_active
                      AND rp.permission_code = $1
                      AND (
                        r.id = u.primary_role_id
                        OR r.id IN (SELECT ur.role_id FROM user_roles ur WHERE ur.user_id = u.id)
                      )
                )
              )
            ORDER BY u.id
            "#,
        )
        .bind(Permission::USER_MANAGE.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("active_user_manager_ids", e))?;
        rows.iter()
            .map(|row| col(row, "id").map(UserId::from_uuid))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting reads
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ReportRepo for PostgresTx {
    async fn ledger_entries(&mut self, scope: &LedgerScope) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, txn_type, reason, ref_type, ref_id, warehouse_id, product_id, batch_id,
                   qty, unit_cost, created_by, created_at
            FROM inventory_ledger
            WHERE ($1::uuid IS NULL OR warehouse_id = $1)
              AND ($2::uuid IS NULL OR product_id = $2)
              AND ($3::text IS NULL OR reason = $3)
            ORDER BY created_at, id
            "#,
        )
        .bind(scope.warehouse_id.map(|w| *w.as_uuid()))
        .bind(scope.product_id.map(|p| *p.as_uuid()))
        .bind(scope.reason.map(|r| r.as_str()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("ledger_entries", e))?;
        decode_all(&rows, ledger_from_row)
    }

    async fn list_stock_summaries(
        &mut self,
        warehouse_id: Option<WarehouseId>,
        product_id: Option<ProductId>,
    ) -> StoreResult<Vec<StockSummary>> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM stock_summary \
             WHERE ($1::uuid IS NULL OR warehouse_id = $1) \
               AND ($2::uuid IS NULL OR product_id = $2) \
             ORDER BY warehouse_id, product_id, batch_id"
        );
        let rows = sqlx::query(&sql)
            .bind(warehouse_id.map(|w| *w.as_uuid()))
            .bind(product_id.map(|p| *p.as_uuid()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_stock_summaries", e))?;
        decode_all(&rows, summary_from_row)
    }
}
