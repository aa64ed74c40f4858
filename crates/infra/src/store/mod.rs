//! Versioned document storage boundary.
//!
//! Mutable records (variants, vouchers, orders, carts) carry a version and are
//! written through compare-and-swap change sets. Reference records (products,
//! addresses) are read-only here.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryCommerceStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCommerceStore;
pub use r#trait::{ChangeSet, CommerceStore, Document, DocumentKey, StagedWrite, StoreError};
