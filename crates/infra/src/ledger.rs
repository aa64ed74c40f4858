//! Stock movements against tracked variants.
//!
//! Each call records one reservation or release inside the caller's unit of
//! work. Nothing is persisted until that unit of work commits.

use chrono::{DateTime, Utc};

use storefront_core::VariantId;
use storefront_inventory::{InventoryCommand, InventoryEvent, ReleaseStock, ReserveStock};

use crate::error::OrderError;
use crate::store::CommerceStore;
use crate::unit_of_work::UnitOfWork;

/// Net effect of one stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockAdjustment {
    pub variant_id: VariantId,
    /// Signed change to the stock level (negative for reservations).
    pub change: i64,
    pub remaining: u32,
}

/// Reserve/release/delta against variants tracked by a unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryLedger;

fn summarize(variant_id: VariantId, events: &[InventoryEvent]) -> StockAdjustment {
    StockAdjustment {
        variant_id,
        change: events.iter().map(InventoryEvent::stock_change).sum(),
        remaining: events.last().map(InventoryEvent::remaining).unwrap_or_default(),
    }
}

impl InventoryLedger {
    /// Take `quantity` units out of stock. Fails with `OutOfStock` when the
    /// variant cannot cover it.
    pub fn reserve<S>(
        uow: &mut UnitOfWork<'_, S>,
        variant_id: VariantId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<StockAdjustment, OrderError>
    where
        S: CommerceStore + ?Sized,
    {
        let command = InventoryCommand::ReserveStock(ReserveStock {
            variant_id,
            quantity,
            occurred_at: at,
        });
        let events = uow.execute_variant(variant_id, &command)?;
        Ok(summarize(variant_id, &events))
    }

    /// Return `quantity` units to stock.
    pub fn release<S>(
        uow: &mut UnitOfWork<'_, S>,
        variant_id: VariantId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<StockAdjustment, OrderError>
    where
        S: CommerceStore + ?Sized,
    {
        let command = InventoryCommand::ReleaseStock(ReleaseStock {
            variant_id,
            quantity,
            occurred_at: at,
        });
        let events = uow.execute_variant(variant_id, &command)?;
        Ok(summarize(variant_id, &events))
    }

    /// Apply a signed quantity change as seen by an order: positive reserves more,
    /// negative gives units back, zero does nothing.
    pub fn delta<S>(
        uow: &mut UnitOfWork<'_, S>,
        variant_id: VariantId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAdjustment>, OrderError>
    where
        S: CommerceStore + ?Sized,
    {
        let Some(command) = InventoryCommand::for_delta(variant_id, delta, at)? else {
            return Ok(None);
        };
        let events = uow.execute_variant(variant_id, &command)?;
        Ok(Some(summarize(variant_id, &events)))
    }
}
