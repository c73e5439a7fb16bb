//! Purchasing domain: purchase orders, goods receipt notes (GRNs) and the
//! lifecycle rules that connect them.
//!
//! Pure, deterministic domain logic (no IO, no locking, no storage). Posting a
//! GRN here only validates and mutates in-memory documents and returns the
//! stock receipts the caller must book into the inventory ledger inside the
//! same transaction.

pub mod grn;
pub mod numbering;
pub mod order;
pub mod receipt;
pub mod status;

pub use grn::{BatchSelector, Grn, GrnLine, NewGrn, NewGrnLine};
pub use numbering::{new_grn_number, new_po_number};
pub use order::{NewPurchaseOrder, NewPurchaseOrderLine, PurchaseOrder, PurchaseOrderLine};
pub use receipt::{
    ReceiptLinePlan, StockReceipt, draft_grn, post_grn_against, validate_receipt_request,
};
pub use status::{GrnStatus, PurchaseOrderStatus, validate_grn_transition, validate_po_transition};
