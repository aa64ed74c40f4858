//! Product catalog records.
//!
//! Products are maintained outside the order engine; it only reads them to
//! price order lines and to scope vouchers.

pub mod product;

pub use product::Product;
