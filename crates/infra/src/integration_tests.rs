//! Workflow tests for the services over the in-memory store.
//!
//! Covers: stock movements keep the summary equal to the ledger, the PO → GRN
//! → ledger path, concurrent writers on one key or one PO line, and the
//! permission gate with its last-manager guard.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use medstock_auth::{AuthProvider, ExternalIdentity, GatedOperation, NewUser, RoleName, UpdateUser};
    use medstock_core::{ProductId, Quantity, RoleId, UnitCost, UserId};
    use medstock_inventory::{InventoryReason, NewWarehouse, StockKey, TxnType, Warehouse};
    use medstock_parties::{ContactInfo, NewParty, Party, PartyType};
    use medstock_products::{Batch, NewBatch, NewProduct, Product};
    use medstock_purchasing::{
        GrnStatus, NewGrn, NewGrnLine, NewPurchaseOrder, NewPurchaseOrderLine, PurchaseOrder,
        PurchaseOrderStatus,
    };

    use crate::error::ServiceError;
    use crate::reports::{
        PageRequest, PurchaseRegisterFilter, ReportService, StockInwardFilter, StockMovementFilter,
    };
    use crate::services::{
        MasterDataService, PurchasingService, StockEngine, StockMovementRequest,
        UserAdminService, ensure_admin_user, seed_rbac,
    };
    use crate::store::{AccessRepo, Database, InMemoryDatabase, InventoryRepo, StoreTx};

    struct Fixture {
        db: InMemoryDatabase,
        stock: StockEngine<InMemoryDatabase>,
        masters: MasterDataService<InMemoryDatabase>,
        purchasing: PurchasingService<InMemoryDatabase>,
        reports: ReportService<InMemoryDatabase>,
        actor: UserId,
        supplier: Party,
        warehouse: Warehouse,
        product: Product,
        batch: Batch,
    }

    fn qty(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn code(err: &ServiceError) -> &'static str {
        err.code()
    }

    async fn fixture() -> Fixture {
        let db = InMemoryDatabase::with_lock_timeout(Duration::from_secs(5));
        let masters = MasterDataService::new(db.clone());

        let supplier = masters
            .create_party(NewParty {
                name: "Sun Pharma Distributors".to_string(),
                party_type: PartyType::Distributor,
                contact: ContactInfo::default(),
            })
            .await
            .unwrap();
        let warehouse = masters
            .create_warehouse(NewWarehouse {
                code: "BLR-01".to_string(),
                name: "Bangalore Central".to_string(),
                address: None,
            })
            .await
            .unwrap();
        let product = masters.create_product(product_cmd("PCM-500")).await.unwrap();
        let batch = masters
            .create_batch(NewBatch {
                product_id: product.id,
                batch_no: "B-001".to_string(),
                expiry_date: NaiveDate::from_ymd_opt(2028, 6, 30).unwrap(),
                mfg_date: None,
                mrp: None,
            })
            .await
            .unwrap();

        Fixture {
            stock: StockEngine::new(db.clone()),
            purchasing: PurchasingService::new(db.clone()),
            reports: ReportService::new(db.clone()),
            masters,
            db,
            actor: UserId::new(),
            supplier,
            warehouse,
            product,
            batch,
        }
    }

    fn product_cmd(sku: &str) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: "Paracetamol 500mg".to_string(),
            uom: "STRIP".to_string(),
            brand: None,
            barcode: None,
            hsn: None,
            gst_rate: None,
        }
    }

    impl Fixture {
        fn request(&self, reason: InventoryReason) -> StockMovementRequest {
            StockMovementRequest {
                warehouse_id: self.warehouse.id,
                product_id: self.product.id,
                batch_id: self.batch.id,
                reason,
                actor: self.actor,
                reference: None,
                unit_cost: None,
            }
        }

        fn key(&self) -> StockKey {
            StockKey::new(self.warehouse.id, self.product.id, self.batch.id)
        }

        async fn on_hand(&self) -> Option<Quantity> {
            let mut tx = self.db.begin().await.unwrap();
            tx.get_stock_summary(&self.key())
                .await
                .unwrap()
                .map(|s| s.qty_on_hand)
        }

        async fn ledger_sum(&self) -> (usize, Quantity) {
            let page = self
                .reports
                .stock_movement(&StockMovementFilter {
                    product_id: Some(self.product.id),
                    page: PageRequest {
                        page: 1,
                        page_size: 500,
                    },
                    ..Default::default()
                })
                .await
                .unwrap();
            (page.total, page.items.iter().map(|r| r.qty_in - r.qty_out).sum())
        }

        async fn approved_po(&self, ordered: &str) -> PurchaseOrder {
            let po = self
                .purchasing
                .create_po(
                    NewPurchaseOrder {
                        supplier_id: self.supplier.id,
                        warehouse_id: self.warehouse.id,
                        order_date: day(1),
                        expected_date: Some(day(10)),
                        notes: None,
                        lines: vec![NewPurchaseOrderLine {
                            product_id: self.product.id,
                            ordered_qty: qty(ordered),
                            free_qty: Quantity::ZERO,
                            unit_cost: Some(UnitCost::new(Decimal::new(125, 1)).unwrap()),
                            line_notes: None,
                        }],
                    },
                    self.actor,
                )
                .await
                .unwrap();
            self.purchasing.approve_po(po.id, self.actor).await.unwrap()
        }

        fn receipt(&self, po: &PurchaseOrder, received: &str, batch_no: &str) -> NewGrn {
            NewGrn {
                supplier_id: None,
                warehouse_id: None,
                received_date: day(5),
                lines: vec![NewGrnLine {
                    po_line_id: po.lines[0].id,
                    received_qty: qty(received),
                    free_qty: Quantity::ZERO,
                    unit_cost: None,
                    batch_id: None,
                    batch_no: Some(batch_no.to_string()),
                    expiry_date: Some(NaiveDate::from_ymd_opt(2028, 1, 31).unwrap()),
                }],
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stock Engine
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn movements_keep_summary_equal_to_ledger() {
        let f = fixture().await;

        f.stock
            .stock_in(f.request(InventoryReason::OpeningStock), qty("100"))
            .await
            .unwrap();
        let out = f
            .stock
            .stock_out(f.request(InventoryReason::SalesDispatch), qty("30.5"))
            .await
            .unwrap();
        assert_eq!(out.ledger.txn_type, TxnType::Out);
        assert_eq!(out.ledger.qty, qty("-30.5"));

        let adjust = f
            .stock
            .stock_adjust(f.request(InventoryReason::StockAdjustment), qty("-4.5"))
            .await
            .unwrap();
        assert_eq!(adjust.summary.qty_on_hand, qty("65"));

        assert_eq!(f.on_hand().await, Some(qty("65")));
        assert_eq!(f.ledger_sum().await, (3, qty("65")));
    }

    #[tokio::test]
    async fn stock_out_beyond_balance_writes_nothing() {
        let f = fixture().await;
        f.stock
            .stock_in(f.request(InventoryReason::OpeningStock), qty("5"))
            .await
            .unwrap();

        let err = f
            .stock
            .stock_out(f.request(InventoryReason::SalesDispatch), qty("5.001"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "INSUFFICIENT_STOCK");

        let err = f
            .stock
            .stock_adjust(f.request(InventoryReason::StockAdjustment), qty("-6"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "INSUFFICIENT_STOCK");

        assert_eq!(f.on_hand().await, Some(qty("5")));
        assert_eq!(f.ledger_sum().await, (1, qty("5")));
    }

    #[tokio::test]
    async fn adjustments_never_drive_the_balance_negative() {
        let f = fixture().await;
        let adjust = |delta: &str| f.stock.stock_adjust(f.request(InventoryReason::StockAdjustment), qty(delta));

        assert_eq!(adjust("5").await.unwrap().summary.qty_on_hand, qty("5"));
        assert_eq!(adjust("-3").await.unwrap().summary.qty_on_hand, qty("2"));
        let err = adjust("-5").await.unwrap_err();
        assert_eq!(code(&err), "INSUFFICIENT_STOCK");

        assert_eq!(f.on_hand().await, Some(qty("2")));
        assert_eq!(f.ledger_sum().await, (2, qty("2")));
    }

    #[tokio::test]
    async fn stock_out_of_unknown_key_is_insufficient() {
        let f = fixture().await;
        let err = f
            .stock
            .stock_out(f.request(InventoryReason::SalesDispatch), qty("1"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "INSUFFICIENT_STOCK");
        assert_eq!(f.on_hand().await, None);
    }

    #[tokio::test]
    async fn invalid_movements_are_rejected_before_locking() {
        let f = fixture().await;

        let err = f
            .stock
            .stock_in(f.request(InventoryReason::OpeningStock), Quantity::ZERO)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "INVALID_QUANTITY");

        let err = f
            .stock
            .stock_adjust(f.request(InventoryReason::StockAdjustment), Quantity::ZERO)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "INVALID_QUANTITY");

        let other = f.masters.create_product(product_cmd("AMX-250")).await.unwrap();
        let mut req = f.request(InventoryReason::OpeningStock);
        req.product_id = other.id;
        let err = f.stock.stock_in(req, qty("1")).await.unwrap_err();
        assert_eq!(code(&err), "INVALID_STATE");

        let mut req = f.request(InventoryReason::OpeningStock);
        req.product_id = ProductId::new();
        let err = f.stock.stock_in(req, qty("1")).await.unwrap_err();
        assert_eq!(code(&err), "NOT_FOUND");

        assert_eq!(f.ledger_sum().await.0, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_stock_outs_cannot_both_pass_the_balance_check() {
        let f = fixture().await;
        f.stock
            .stock_in(f.request(InventoryReason::OpeningStock), qty("10"))
            .await
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let stock = f.stock.clone();
                let req = f.request(InventoryReason::SalesDispatch);
                tokio::spawn(async move { stock.stock_out(req, qty("7")).await })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) if code(&err) == "INSUFFICIENT_STOCK" => insufficient += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(f.on_hand().await, Some(qty("3")));
        assert_eq!(f.ledger_sum().await, (2, qty("3")));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Purchasing
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn partial_then_full_receipt_closes_the_order() {
        let f = fixture().await;
        let po = f.approved_po("10").await;
        assert_eq!(po.status, PurchaseOrderStatus::Approved);

        let grn = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "4", "NEW-01"), f.actor)
            .await
            .unwrap();
        assert_eq!(grn.status, GrnStatus::Draft);
        assert_eq!(grn.lines[0].unit_cost, po.lines[0].unit_cost);

        let posted = f.purchasing.post_grn(grn.id, f.actor).await.unwrap();
        assert_eq!(posted.grn.status, GrnStatus::Posted);
        assert_eq!(posted.purchase_order.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(posted.postings.len(), 1);

        let ledger = &posted.postings[0].ledger;
        assert_eq!(ledger.reason, InventoryReason::PurchaseGrn);
        assert_eq!(ledger.ref_type.as_deref(), Some("GRN"));
        assert_eq!(ledger.ref_id.as_deref(), Some(grn.grn_number.as_str()));
        assert_eq!(ledger.qty, qty("4"));

        let batches = f.masters.list_batches(f.product.id).await.unwrap();
        assert!(batches.iter().any(|b| b.batch_no == "NEW-01"));

        let second = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "6", "NEW-01"), f.actor)
            .await
            .unwrap();
        assert_eq!(second.lines[0].batch_id, grn.lines[0].batch_id);

        let posted = f.purchasing.post_grn(second.id, f.actor).await.unwrap();
        assert_eq!(posted.purchase_order.status, PurchaseOrderStatus::Closed);
        assert_eq!(posted.purchase_order.total_received(), qty("10"));
        assert_eq!(posted.postings[0].summary.qty_on_hand, qty("10"));
    }

    #[tokio::test]
    async fn two_line_order_closes_after_both_lines_are_received() {
        let f = fixture().await;
        let second_product = f.masters.create_product(product_cmd("AMX-250")).await.unwrap();
        let line = |product_id, ordered: &str| NewPurchaseOrderLine {
            product_id,
            ordered_qty: qty(ordered),
            free_qty: Quantity::ZERO,
            unit_cost: None,
            line_notes: None,
        };
        let po = f
            .purchasing
            .create_po(
                NewPurchaseOrder {
                    supplier_id: f.supplier.id,
                    warehouse_id: f.warehouse.id,
                    order_date: day(1),
                    expected_date: None,
                    notes: Some("two lines".to_string()),
                    lines: vec![line(f.product.id, "10"), line(second_product.id, "8")],
                },
                f.actor,
            )
            .await
            .unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Draft);
        let po = f.purchasing.approve_po(po.id, f.actor).await.unwrap();

        let receive = |line_index: usize, received: &str| NewGrn {
            supplier_id: Some(f.supplier.id),
            warehouse_id: Some(f.warehouse.id),
            received_date: day(6),
            lines: vec![NewGrnLine {
                po_line_id: po.lines[line_index].id,
                received_qty: qty(received),
                free_qty: Quantity::ZERO,
                unit_cost: None,
                batch_id: None,
                batch_no: Some(format!("TL-{line_index}")),
                expiry_date: Some(NaiveDate::from_ymd_opt(2029, 3, 31).unwrap()),
            }],
        };

        let first = f
            .purchasing
            .create_grn_from_po(po.id, receive(0, "10"), f.actor)
            .await
            .unwrap();
        let posted = f.purchasing.post_grn(first.id, f.actor).await.unwrap();
        assert_eq!(posted.purchase_order.status, PurchaseOrderStatus::PartiallyReceived);

        let second = f
            .purchasing
            .create_grn_from_po(po.id, receive(1, "8"), f.actor)
            .await
            .unwrap();
        let posted = f.purchasing.post_grn(second.id, f.actor).await.unwrap();
        let po = posted.purchase_order;
        assert_eq!(po.status, PurchaseOrderStatus::Closed);
        assert!(po.lines.iter().all(|l| l.received_qty <= l.ordered_qty));
        assert_eq!(po.lines[1].received_qty, qty("8"));
    }

    #[tokio::test]
    async fn reposting_a_grn_changes_nothing() {
        let f = fixture().await;
        let po = f.approved_po("10").await;
        let grn = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "3", "RP-01"), f.actor)
            .await
            .unwrap();
        let first = f.purchasing.post_grn(grn.id, f.actor).await.unwrap();
        let key = first.postings[0].summary.key();

        let err = f.purchasing.post_grn(grn.id, f.actor).await.unwrap_err();
        assert_eq!(code(&err), "GRN_ALREADY_POSTED");

        let po = f.purchasing.get_po(po.id).await.unwrap();
        assert_eq!(po.total_received(), qty("3"));
        let mut tx = f.db.begin().await.unwrap();
        let summary = tx.get_stock_summary(&key).await.unwrap().unwrap();
        assert_eq!(summary.qty_on_hand, qty("3"));
    }

    #[tokio::test]
    async fn receipt_is_capped_at_the_remaining_quantity() {
        let f = fixture().await;
        let po = f.approved_po("8").await;

        let err = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "8.001", "OR-01"), f.actor)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "OVER_RECEIPT");

        let grn = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "8", "OR-01"), f.actor)
            .await
            .unwrap();
        let posted = f.purchasing.post_grn(grn.id, f.actor).await.unwrap();
        assert_eq!(posted.purchase_order.status, PurchaseOrderStatus::Closed);
    }

    #[tokio::test]
    async fn free_goods_enter_stock_but_not_the_received_total() {
        let f = fixture().await;
        let po = f.approved_po("10").await;
        let mut req = f.receipt(&po, "5", "FR-01");
        req.lines[0].free_qty = qty("1");

        let grn = f
            .purchasing
            .create_grn_from_po(po.id, req, f.actor)
            .await
            .unwrap();
        let posted = f.purchasing.post_grn(grn.id, f.actor).await.unwrap();
        assert_eq!(posted.postings[0].summary.qty_on_hand, qty("6"));
        assert_eq!(posted.purchase_order.total_received(), qty("5"));
        assert_eq!(posted.purchase_order.status, PurchaseOrderStatus::PartiallyReceived);
    }

    #[tokio::test]
    async fn receipts_need_an_approved_order() {
        let f = fixture().await;
        let draft = f
            .purchasing
            .create_po(
                NewPurchaseOrder {
                    supplier_id: f.supplier.id,
                    warehouse_id: f.warehouse.id,
                    order_date: day(1),
                    expected_date: None,
                    notes: None,
                    lines: vec![NewPurchaseOrderLine {
                        product_id: f.product.id,
                        ordered_qty: qty("5"),
                        free_qty: Quantity::ZERO,
                        unit_cost: None,
                        line_notes: None,
                    }],
                },
                f.actor,
            )
            .await
            .unwrap();
        assert!(draft.po_number.starts_with("PO-"));

        let err = f
            .purchasing
            .create_grn_from_po(draft.id, f.receipt(&draft, "1", "NA-01"), f.actor)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "PO_NOT_APPROVED");
    }

    #[tokio::test]
    async fn failed_post_rolls_back_every_write() {
        let f = fixture().await;
        let po = f.approved_po("10").await;
        let grn = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "4", "RB-01"), f.actor)
            .await
            .unwrap();
        f.purchasing.cancel_po(po.id, f.actor).await.unwrap();

        let err = f.purchasing.post_grn(grn.id, f.actor).await.unwrap_err();
        assert_eq!(code(&err), "INVALID_STATE");

        let grn = f.purchasing.get_grn(grn.id).await.unwrap();
        assert_eq!(grn.status, GrnStatus::Draft);
        let po = f.purchasing.get_po(po.id).await.unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Cancelled);
        assert_eq!(po.total_received(), Quantity::ZERO);
        assert_eq!(f.ledger_sum().await.0, 0);
    }

    #[tokio::test]
    async fn approval_and_cancellation_record_the_actor() {
        let f = fixture().await;
        let po = f.approved_po("10").await;
        assert_eq!(po.approved_by, Some(f.actor));
        assert!(po.cancelled_by.is_none());

        let clerk = UserId::new();
        let grn = f
            .purchasing
            .create_grn_from_po(po.id, f.receipt(&po, "2", "CX-01"), f.actor)
            .await
            .unwrap();
        let cancelled = f.purchasing.cancel_grn(grn.id, clerk).await.unwrap();
        assert_eq!(cancelled.status, GrnStatus::Cancelled);
        assert_eq!(f.purchasing.get_grn(grn.id).await.unwrap().cancelled_by, Some(clerk));

        let manager = UserId::new();
        f.purchasing.cancel_po(po.id, manager).await.unwrap();
        let stored = f.purchasing.get_po(po.id).await.unwrap();
        assert_eq!(stored.cancelled_by, Some(manager));
        assert_eq!(stored.approved_by, Some(f.actor));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_grns_cannot_over_receive_one_line() {
        let f = fixture().await;
        let po = f.approved_po("10").await;

        let mut grn_ids = Vec::new();
        for batch_no in ["RC-01", "RC-02"] {
            let grn = f
                .purchasing
                .create_grn_from_po(po.id, f.receipt(&po, "6", batch_no), f.actor)
                .await
                .unwrap();
            grn_ids.push(grn.id);
        }

        let handles: Vec<_> = grn_ids
            .into_iter()
            .map(|id| {
                let purchasing = f.purchasing.clone();
                let actor = f.actor;
                tokio::spawn(async move { purchasing.post_grn(id, actor).await })
            })
            .collect();

        let mut ok = 0;
        let mut over = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) if code(&err) == "OVER_RECEIPT" => over += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!((ok, over), (1, 1));

        let po = f.purchasing.get_po(po.id).await.unwrap();
        assert_eq!(po.total_received(), qty("6"));
        assert_eq!(po.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(f.ledger_sum().await, (1, qty("6")));
    }

    #[tokio::test]
    async fn duplicate_master_codes_are_conflicts() {
        let f = fixture().await;
        let err = f
            .masters
            .create_product(product_cmd("PCM-500"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "CONFLICT");
        assert_eq!(err.status(), 409);

        let err = f
            .masters
            .create_warehouse(NewWarehouse {
                code: "BLR-01".to_string(),
                name: "Duplicate".to_string(),
                address: None,
            })
            .await
            .unwrap_err();
        assert_eq!(code(&err), "CONFLICT");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reports
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn inward_and_register_reports_join_purchasing_data() {
        let f = fixture().await;
        let po = f.approved_po("10").await;

        let mut first = f.receipt(&po, "4", "RPT-01");
        first.lines[0].free_qty = qty("1");
        let grn = f.purchasing.create_grn_from_po(po.id, first, f.actor).await.unwrap();
        f.purchasing.post_grn(grn.id, f.actor).await.unwrap();

        let mut second = f.receipt(&po, "2", "RPT-02");
        second.received_date = day(7);
        let later = f.purchasing.create_grn_from_po(po.id, second, f.actor).await.unwrap();
        f.purchasing.post_grn(later.id, f.actor).await.unwrap();

        let inward_page = |page| StockInwardFilter {
            supplier_id: Some(f.supplier.id),
            page: PageRequest { page, page_size: 1 },
            ..Default::default()
        };
        let newest = f.reports.stock_inward(&inward_page(1)).await.unwrap();
        assert_eq!(newest.total, 2);
        assert_eq!(newest.items.len(), 1);
        assert_eq!(newest.items[0].grn_number, later.grn_number);
        assert_eq!(newest.items[0].qty_received, qty("2"));
        assert_eq!(newest.items[0].free_qty, Quantity::ZERO);

        let oldest = f.reports.stock_inward(&inward_page(2)).await.unwrap();
        let row = &oldest.items[0];
        assert_eq!(row.grn_number, grn.grn_number);
        assert_eq!(row.po_number.as_deref(), Some(po.po_number.as_str()));
        assert_eq!(row.supplier_name.as_deref(), Some("Sun Pharma Distributors"));
        assert_eq!(row.batch_no.as_deref(), Some("RPT-01"));
        assert_eq!(row.qty_received, qty("4"));
        assert_eq!(row.free_qty, qty("1"));
        assert_eq!(row.value, Decimal::new(50, 0));
        assert_eq!(row.posted_by, Some(f.actor));

        let err = f.reports.stock_inward(&inward_page(0)).await.unwrap_err();
        assert_eq!(code(&err), "VALIDATION_ERROR");

        let other = f
            .masters
            .create_party(NewParty {
                name: "Cipla Traders".to_string(),
                party_type: PartyType::Distributor,
                contact: ContactInfo::default(),
            })
            .await
            .unwrap();
        let other_po = f
            .purchasing
            .create_po(
                NewPurchaseOrder {
                    supplier_id: other.id,
                    warehouse_id: f.warehouse.id,
                    order_date: day(3),
                    expected_date: None,
                    notes: None,
                    lines: vec![NewPurchaseOrderLine {
                        product_id: f.product.id,
                        ordered_qty: qty("3"),
                        free_qty: Quantity::ZERO,
                        unit_cost: None,
                        line_notes: None,
                    }],
                },
                f.actor,
            )
            .await
            .unwrap();

        let register = f
            .reports
            .purchase_register(&PurchaseRegisterFilter {
                page: PageRequest { page: 1, page_size: 1 },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(register.total, 2);
        assert_eq!(register.items[0].purchase_order_id, other_po.id);

        let sun = f
            .reports
            .purchase_register(&PurchaseRegisterFilter {
                supplier_name: Some(" sun PHARMA ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sun.total, 1);
        let row = &sun.items[0];
        assert_eq!(row.purchase_order_id, po.id);
        assert_eq!(row.ordered_qty, qty("10"));
        assert_eq!(row.received_qty, qty("6"));
        assert_eq!(row.pending_qty, qty("4"));
        assert_eq!(row.value, Decimal::new(125, 0));

        let summary = f.reports.stock_summary(Some(f.warehouse.id), None).await.unwrap();
        assert_eq!(summary.len(), 2);
        assert!(summary.iter().all(|s| s.sku.as_deref() == Some("PCM-500")));
    }

    #[tokio::test]
    async fn dashboard_counts_only_keys_with_stock() {
        let f = fixture().await;
        let other = f
            .masters
            .create_batch(NewBatch {
                product_id: f.product.id,
                batch_no: "B-002".to_string(),
                expiry_date: NaiveDate::from_ymd_opt(2029, 1, 31).unwrap(),
                mfg_date: None,
                mrp: None,
            })
            .await
            .unwrap();

        f.stock
            .stock_in(f.request(InventoryReason::OpeningStock), qty("5"))
            .await
            .unwrap();
        let mut second = f.request(InventoryReason::OpeningStock);
        second.batch_id = other.id;
        f.stock.stock_in(second, qty("2")).await.unwrap();
        f.stock
            .stock_out(f.request(InventoryReason::SalesDispatch), qty("5"))
            .await
            .unwrap();

        let metrics = f.reports.dashboard_metrics().await.unwrap();
        assert_eq!(metrics.total_products, 1);
        assert_eq!(metrics.total_parties, 1);
        assert_eq!(metrics.total_warehouses, 1);
        assert_eq!(metrics.stock_items_count, 1);
        assert_eq!(f.reports.stock_summary(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn movement_report_rejects_bad_paging() {
        let f = fixture().await;
        let err = f
            .reports
            .stock_movement(&StockMovementFilter {
                page: PageRequest {
                    page: 1,
                    page_size: 501,
                },
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(code(&err), "VALIDATION_ERROR");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access control
    // ─────────────────────────────────────────────────────────────────────

    async fn role_id(db: &InMemoryDatabase, name: &str) -> RoleId {
        let mut tx = db.begin().await.unwrap();
        tx.find_role_by_name(name).await.unwrap().unwrap().id
    }

    fn new_user(email: &str, role_ids: Vec<RoleId>) -> NewUser {
        NewUser {
            email: email.to_string(),
            full_name: None,
            auth_provider: Default::default(),
            external_subject: None,
            organization_slug: None,
            is_active: true,
            is_superuser: false,
            role_ids,
        }
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = InMemoryDatabase::new();
        let first = seed_rbac(&db).await.unwrap();
        assert_eq!(first.roles_created, 7);

        let second = seed_rbac(&db).await.unwrap();
        assert_eq!(second.roles_created, 0);
        assert_eq!(second.roles_updated, 7);

        let a = ensure_admin_user(&db, "Admin@Medstock.local").await.unwrap();
        let b = ensure_admin_user(&db, "admin@medstock.local").await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(b.is_superuser);
        assert_eq!(b.primary_role_id, Some(role_id(&db, RoleName::ADMIN.as_str()).await));
    }

    #[tokio::test]
    async fn gate_refuses_missing_permissions() {
        let db = InMemoryDatabase::new();
        seed_rbac(&db).await.unwrap();
        ensure_admin_user(&db, "admin@medstock.local").await.unwrap();
        let users = UserAdminService::new(db.clone());

        let support = role_id(&db, "SERVICE_SUPPORT").await;
        let viewer = users
            .create_user(new_user("viewer@medstock.local", vec![support]))
            .await
            .unwrap();
        assert_eq!(
            viewer.permission_codes(),
            vec!["inventory:view".to_string(), "reports:view".to_string()]
        );

        assert!(users.authorize(viewer.user_id, &GatedOperation::ViewReports).await.is_ok());
        let err = users
            .authorize(viewer.user_id, &GatedOperation::PostGrn)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");

        let mut cmd = new_user("root@medstock.local", Vec::new());
        cmd.is_superuser = true;
        let root = users.create_user(cmd).await.unwrap();
        assert!(users.authorize(root.user_id, &GatedOperation::PostGrn).await.is_ok());

        users.deactivate_user(root.user_id).await.unwrap();
        let err = users
            .authorize(root.user_id, &GatedOperation::ViewReports)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");

        let err = users
            .authorize(UserId::new(), &GatedOperation::ViewReports)
            .await
            .unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");
    }

    #[tokio::test]
    async fn last_user_manager_cannot_lock_everyone_out() {
        let db = InMemoryDatabase::new();
        seed_rbac(&db).await.unwrap();
        let admin = ensure_admin_user(&db, "admin@medstock.local").await.unwrap();
        let users = UserAdminService::new(db.clone());

        let err = users.deactivate_user(admin.id).await.unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");

        // Still holds user:manage through the ADMIN role.
        users
            .update_user(
                admin.id,
                UpdateUser {
                    is_superuser: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = users.assign_roles(admin.id, Vec::new()).await.unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");

        let access = users.user_access(admin.id).await.unwrap();
        assert!(access.can_manage_users());

        let admin_role = role_id(&db, RoleName::ADMIN.as_str()).await;
        users
            .create_user(new_user("deputy@medstock.local", vec![admin_role]))
            .await
            .unwrap();
        let demoted = users.deactivate_user(admin.id).await.unwrap();
        assert!(!demoted.is_active);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let db = InMemoryDatabase::new();
        let users = UserAdminService::new(db.clone());
        users.create_user(new_user("ops@medstock.local", Vec::new())).await.unwrap();

        let err = users
            .create_user(new_user("OPS@medstock.local", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "CONFLICT");
    }

    #[tokio::test]
    async fn unknown_role_assignment_is_not_found() {
        let db = InMemoryDatabase::new();
        let users = UserAdminService::new(db.clone());
        let err = users
            .create_user(new_user("ops@medstock.local", vec![RoleId::new()]))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "NOT_FOUND");

        let mut tx = db.begin().await.unwrap();
        assert!(tx.list_users().await.unwrap().is_empty());
        tx.rollback().await.unwrap();
    }

    fn tenant_identity(role: &str) -> ExternalIdentity {
        ExternalIdentity {
            organization: "acme".to_string(),
            user_id: "u-7".to_string(),
            email: "Ravi.Kumar@Acme.Example".to_string(),
            full_name: None,
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn external_user_is_shadowed_with_its_mapped_role() {
        let db = InMemoryDatabase::new();
        seed_rbac(&db).await.unwrap();
        let users = UserAdminService::new(db.clone());

        let first = users
            .sync_external_user(&tenant_identity("READ_WRITE"))
            .await
            .unwrap();
        let read_write = role_id(&db, "READ_WRITE").await;
        assert_eq!(first.primary_role_id, Some(read_write));
        assert_eq!(first.roles.len(), 1);
        assert!(!first.is_superuser);

        let mut tx = db.begin().await.unwrap();
        let user = tx
            .find_user_by_external_subject("rbac:acme:u-7")
            .await
            .unwrap()
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(user.id, first.user_id);
        assert_eq!(user.auth_provider, AuthProvider::External);
        assert_eq!(user.email, "ravi.kumar@acme.example");
        assert_eq!(user.full_name.as_deref(), Some("Ravi Kumar"));
        assert_eq!(user.organization_slug.as_deref(), Some("acme"));

        let mut demoted = tenant_identity("VIEW_ONLY");
        demoted.full_name = Some("Ravi K".to_string());
        let second = users.sync_external_user(&demoted).await.unwrap();
        assert_eq!(second.user_id, first.user_id);
        assert_eq!(second.primary_role_id, Some(role_id(&db, "VIEW_ONLY").await));
        assert_eq!(users.user_access(first.user_id).await.unwrap().roles.len(), 1);
        assert_eq!(users.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unmapped_tenant_role_is_forbidden() {
        let db = InMemoryDatabase::new();
        seed_rbac(&db).await.unwrap();
        let users = UserAdminService::new(db.clone());

        let err = users
            .sync_external_user(&tenant_identity("BILLING_ADMIN"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "FORBIDDEN");
        assert!(users.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn external_identity_cannot_take_over_a_local_email() {
        let db = InMemoryDatabase::new();
        seed_rbac(&db).await.unwrap();
        let users = UserAdminService::new(db.clone());
        let local = users
            .create_user(new_user("ravi.kumar@acme.example", Vec::new()))
            .await
            .unwrap();

        let err = users
            .sync_external_user(&tenant_identity("ORG_ADMIN"))
            .await
            .unwrap_err();
        assert_eq!(code(&err), "CONFLICT");
        assert_eq!(err.status(), 409);

        let access = users.user_access(local.user_id).await.unwrap();
        assert!(access.roles.is_empty());
        assert_eq!(users.list_users().await.unwrap().len(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        In(i64),
        Out(i64),
        Adjust(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::In),
            (1i64..50).prop_map(Op::Out),
            (-50i64..50).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Adjust),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn balance_always_equals_ledger_sum(ops in prop::collection::vec(op(), 1..25)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let f = fixture().await;
                let mut expected = Quantity::ZERO;
                for op in ops {
                    let result = match op {
                        Op::In(n) => {
                            let req = f.request(InventoryReason::OpeningStock);
                            f.stock.stock_in(req, Quantity::from(n)).await
                        }
                        Op::Out(n) => {
                            let req = f.request(InventoryReason::SalesDispatch);
                            f.stock.stock_out(req, Quantity::from(n)).await
                        }
                        Op::Adjust(n) => {
                            let req = f.request(InventoryReason::StockAdjustment);
                            f.stock.stock_adjust(req, Quantity::from(n)).await
                        }
                    };
                    match result {
                        Ok(posting) => {
                            expected += posting.ledger.qty;
                            assert!(!posting.summary.qty_on_hand.is_negative());
                        }
                        Err(err) => assert_eq!(code(&err), "INSUFFICIENT_STOCK"),
                    }
                }
                let (_, ledger) = f.ledger_sum().await;
                assert_eq!(ledger, expected);
                assert_eq!(f.on_hand().await.unwrap_or(Quantity::ZERO), expected);
            });
        }
    }
}
