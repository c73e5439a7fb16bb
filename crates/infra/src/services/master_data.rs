//! Parties, warehouses, products and batches.
//!
//! Uniqueness (warehouse code, SKU, batch triple) is left to the store; a
//! violation surfaces as `CONFLICT`.

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

use medstock_core::{BatchId, DomainError, PartyId, ProductId, WarehouseId};
use medstock_inventory::{NewWarehouse, UpdateWarehouse, Warehouse};
use medstock_parties::{NewParty, Party, UpdateParty};
use medstock_products::{Batch, BatchKey, NewBatch, NewProduct, Product, UpdateProduct};

use crate::error::ServiceResult;
use crate::store::{Database, MasterDataRepo, StoreTx};

#[derive(Clone)]
pub struct MasterDataService<D> {
    db: D,
}

impl<D: Database> MasterDataService<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Parties
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, cmd), fields(name = %cmd.name, party_type = cmd.party_type.as_str()), err)]
    pub async fn create_party(&self, cmd: NewParty) -> ServiceResult<Party> {
        let party = Party::register(PartyId::new(), cmd, Utc::now())?;
        let mut tx = self.db.begin().await?;
        tx.save_party(&party).await?;
        tx.commit().await?;
        info!(party_id = %party.id, "party created");
        Ok(party)
    }

    #[instrument(skip(self, cmd), err)]
    pub async fn update_party(&self, id: PartyId, cmd: UpdateParty) -> ServiceResult<Party> {
        let mut tx = self.db.begin().await?;
        let mut party = party_in(&mut tx, id).await?;
        party.apply_update(cmd, Utc::now())?;
        tx.save_party(&party).await?;
        tx.commit().await?;
        Ok(party)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_party(&self, id: PartyId) -> ServiceResult<Party> {
        let mut tx = self.db.begin().await?;
        let mut party = party_in(&mut tx, id).await?;
        party.deactivate(Utc::now());
        tx.save_party(&party).await?;
        tx.commit().await?;
        info!("party deactivated");
        Ok(party)
    }

    pub async fn get_party(&self, id: PartyId) -> ServiceResult<Party> {
        let mut tx = self.db.begin().await?;
        let party = party_in(&mut tx, id).await?;
        tx.rollback().await?;
        Ok(party)
    }

    pub async fn list_parties(&self, include_inactive: bool) -> ServiceResult<Vec<Party>> {
        let mut tx = self.db.begin().await?;
        let parties = tx.list_parties(include_inactive).await?;
        tx.rollback().await?;
        Ok(parties)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Warehouses
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, cmd), fields(code = %cmd.code), err)]
    pub async fn create_warehouse(&self, cmd: NewWarehouse) -> ServiceResult<Warehouse> {
        let warehouse = Warehouse::create(WarehouseId::new(), cmd, Utc::now())?;
        let mut tx = self.db.begin().await?;
        tx.save_warehouse(&warehouse).await?;
        tx.commit().await?;
        info!(warehouse_id = %warehouse.id, "warehouse created");
        Ok(warehouse)
    }

    #[instrument(skip(self, cmd), err)]
    pub async fn update_warehouse(
        &self,
        id: WarehouseId,
        cmd: UpdateWarehouse,
    ) -> ServiceResult<Warehouse> {
        let mut tx = self.db.begin().await?;
        let mut warehouse = warehouse_in(&mut tx, id).await?;
        warehouse.apply_update(cmd, Utc::now())?;
        tx.save_warehouse(&warehouse).await?;
        tx.commit().await?;
        Ok(warehouse)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_warehouse(&self, id: WarehouseId) -> ServiceResult<Warehouse> {
        let mut tx = self.db.begin().await?;
        let mut warehouse = warehouse_in(&mut tx, id).await?;
        warehouse.deactivate(Utc::now());
        tx.save_warehouse(&warehouse).await?;
        tx.commit().await?;
        info!("warehouse deactivated");
        Ok(warehouse)
    }

    pub async fn get_warehouse(&self, id: WarehouseId) -> ServiceResult<Warehouse> {
        let mut tx = self.db.begin().await?;
        let warehouse = warehouse_in(&mut tx, id).await?;
        tx.rollback().await?;
        Ok(warehouse)
    }

    pub async fn list_warehouses(&self, include_inactive: bool) -> ServiceResult<Vec<Warehouse>> {
        let mut tx = self.db.begin().await?;
        let warehouses = tx.list_warehouses(include_inactive).await?;
        tx.rollback().await?;
        Ok(warehouses)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Products
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, cmd), fields(sku = %cmd.sku), err)]
    pub async fn create_product(&self, cmd: NewProduct) -> ServiceResult<Product> {
        let product = Product::create(ProductId::new(), cmd, Utc::now())?;
        let mut tx = self.db.begin().await?;
        tx.save_product(&product).await?;
        tx.commit().await?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    #[instrument(skip(self, cmd), err)]
    pub async fn update_product(&self, id: ProductId, cmd: UpdateProduct) -> ServiceResult<Product> {
        let mut tx = self.db.begin().await?;
        let mut product = product_in(&mut tx, id).await?;
        product.apply_update(cmd, Utc::now())?;
        tx.save_product(&product).await?;
        tx.commit().await?;
        Ok(product)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_product(&self, id: ProductId) -> ServiceResult<Product> {
        let mut tx = self.db.begin().await?;
        let mut product = product_in(&mut tx, id).await?;
        product.deactivate(Utc::now());
        tx.save_product(&product).await?;
        tx.commit().await?;
        info!("product deactivated");
        Ok(product)
    }

    pub async fn get_product(&self, id: ProductId) -> ServiceResult<Product> {
        let mut tx = self.db.begin().await?;
        let product = product_in(&mut tx, id).await?;
        tx.rollback().await?;
        Ok(product)
    }

    pub async fn list_products(&self, include_inactive: bool) -> ServiceResult<Vec<Product>> {
        let mut tx = self.db.begin().await?;
        let products = tx.list_products(include_inactive).await?;
        tx.rollback().await?;
        Ok(products)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, batch_no = %cmd.batch_no, expiry = %cmd.expiry_date),
        err
    )]
    pub async fn create_batch(&self, cmd: NewBatch) -> ServiceResult<Batch> {
        let batch = Batch::create(BatchId::new(), cmd)?;
        let mut tx = self.db.begin().await?;
        product_in(&mut tx, batch.product_id).await?;
        tx.insert_batch(&batch).await?;
        tx.commit().await?;
        info!(batch_id = %batch.id, "batch created");
        Ok(batch)
    }

    pub async fn get_batch(&self, id: BatchId) -> ServiceResult<Batch> {
        let mut tx = self.db.begin().await?;
        let batch = tx
            .get_batch(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Batch not found"))?;
        tx.rollback().await?;
        Ok(batch)
    }

    pub async fn list_batches(&self, product_id: ProductId) -> ServiceResult<Vec<Batch>> {
        let mut tx = self.db.begin().await?;
        let batches = tx.list_batches(product_id).await?;
        tx.rollback().await?;
        Ok(batches)
    }

    /// Look a batch up by its identity triple; `None` when it is not registered.
    pub async fn find_batch(
        &self,
        product_id: ProductId,
        batch_no: &str,
        expiry_date: NaiveDate,
    ) -> ServiceResult<Option<Batch>> {
        let key = BatchKey::new(product_id, batch_no, expiry_date)?;
        let mut tx = self.db.begin().await?;
        let batch = tx.find_batch(&key).await?;
        tx.rollback().await?;
        Ok(batch)
    }
}

async fn party_in<T: StoreTx>(tx: &mut T, id: PartyId) -> ServiceResult<Party> {
    Ok(tx
        .get_party(id)
        .await?
        .ok_or_else(|| DomainError::not_found("Party not found"))?)
}

async fn warehouse_in<T: StoreTx>(tx: &mut T, id: WarehouseId) -> ServiceResult<Warehouse> {
    Ok(tx
        .get_warehouse(id)
        .await?
        .ok_or_else(|| DomainError::not_found("Warehouse not found"))?)
}

async fn product_in<T: MasterDataRepo>(tx: &mut T, id: ProductId) -> ServiceResult<Product> {
    Ok(tx
        .get_product(id)
        .await?
        .ok_or_else(|| DomainError::not_found("Product not found"))?)
}
