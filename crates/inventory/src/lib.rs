//! Inventory domain module.
//!
//! Business rules for per-variant stock, implemented purely as deterministic
//! domain logic (no IO, no storage). The infra layer drives these rules inside
//! a unit of work.

pub mod variant;

pub use variant::{
    InventoryCommand, InventoryEvent, ReleaseStock, ReserveStock, StockReleased, StockReserved,
    Variant,
};
