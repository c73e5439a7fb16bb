//! Product catalogue and expiry-tracked batches.
//!
//! Pure domain logic: validation and state changes only, no IO.

pub mod batch;
pub mod product;

pub use batch::{Batch, BatchKey, NewBatch};
pub use product::{NewProduct, Product, UpdateProduct};
