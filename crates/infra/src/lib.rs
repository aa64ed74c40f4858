//! Infrastructure layer: storage, units of work and order orchestration.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod store;
pub mod unit_of_work;

mod integration_tests;

pub use config::CoordinatorConfig;
pub use coordinator::{
    BatchStatusReport, CreateOrderRequest, OrderCoordinator, OrderOutcome, UpdateOrderRequest,
};
pub use error::OrderError;
pub use ledger::{InventoryLedger, StockAdjustment};
pub use store::{ChangeSet, CommerceStore, Document, DocumentKey, InMemoryCommerceStore, StoreError};
#[cfg(feature = "postgres")]
pub use store::PostgresCommerceStore;
pub use unit_of_work::{PendingEvent, UnitOfWork};
