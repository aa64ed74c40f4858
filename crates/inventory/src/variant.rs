use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, Money, ProductId, VariantId,
};
use storefront_events::Event;

/// Aggregate root: Variant (stock-keeping unit).
///
/// `stock_quantity` is never negative by construction (`u32`), and the only way
/// to move it is through `ReserveStock` / `ReleaseStock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    product_id: ProductId,
    stock_quantity: u32,
    additional_price: Money,
    version: u64,
}

impl Variant {
    /// A catalog-registered variant, as loaded from storage (version 1).
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        stock_quantity: u32,
        additional_price: Money,
    ) -> Self {
        Self {
            id,
            product_id,
            stock_quantity,
            additional_price,
            version: 1,
        }
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn stock_quantity(&self) -> u32 {
        self.stock_quantity
    }

    pub fn additional_price(&self) -> Money {
        self.additional_price
    }

    pub fn can_fulfil(&self, quantity: u32) -> bool {
        self.stock_quantity >= quantity
    }
}

impl AggregateRoot for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReserveStock (decrement available stock to back an order line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (return previously reserved units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
}

impl InventoryCommand {
    /// Translate a signed quantity change into a reserve (positive) or release
    /// (negative) command. Zero means nothing to do.
    pub fn for_delta(
        variant_id: VariantId,
        delta: i64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Option<Self>> {
        if delta == 0 {
            return Ok(None);
        }
        let quantity = u32::try_from(delta.unsigned_abs())
            .map_err(|_| DomainError::validation(format!("stock delta {delta} is out of range")))?;

        let command = if delta > 0 {
            InventoryCommand::ReserveStock(ReserveStock {
                variant_id,
                quantity,
                occurred_at,
            })
        } else {
            InventoryCommand::ReleaseStock(ReleaseStock {
                variant_id,
                quantity,
                occurred_at,
            })
        };
        Ok(Some(command))
    }
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Stock left after the reservation.
    pub remaining: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Stock available after the release.
    pub remaining: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    StockReserved(StockReserved),
    StockReleased(StockReleased),
}

impl InventoryEvent {
    pub fn variant_id(&self) -> VariantId {
        match self {
            InventoryEvent::StockReserved(e) => e.variant_id,
            InventoryEvent::StockReleased(e) => e.variant_id,
        }
    }

    /// Signed change applied to the stock (negative for reservations).
    pub fn stock_change(&self) -> i64 {
        match self {
            InventoryEvent::StockReserved(e) => -i64::from(e.quantity),
            InventoryEvent::StockReleased(e) => i64::from(e.quantity),
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            InventoryEvent::StockReserved(e) => e.remaining,
            InventoryEvent::StockReleased(e) => e.remaining,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockReserved(_) => "inventory.variant.stock_reserved",
            InventoryEvent::StockReleased(_) => "inventory.variant.stock_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::StockReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Variant {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::StockReserved(e) => {
                self.stock_quantity = e.remaining;
            }
            InventoryEvent::StockReleased(e) => {
                self.stock_quantity = e.remaining;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            InventoryCommand::ReleaseStock(cmd) => self.handle_release(cmd),
        }
    }
}

impl Variant {
    fn ensure_variant_id(&self, variant_id: VariantId) -> Result<(), DomainError> {
        if self.id != variant_id {
            return Err(DomainError::validation("variant_id mismatch"));
        }
        Ok(())
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("reserved quantity must be positive"));
        }

        if !self.can_fulfil(cmd.quantity) {
            return Err(DomainError::out_of_stock(
                self.id,
                cmd.quantity,
                self.stock_quantity,
            ));
        }

        Ok(vec![InventoryEvent::StockReserved(StockReserved {
            variant_id: self.id,
            quantity: cmd.quantity,
            remaining: self.stock_quantity - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("released quantity must be positive"));
        }

        let remaining = self
            .stock_quantity
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;

        Ok(vec![InventoryEvent::StockReleased(StockReleased {
            variant_id: self.id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }
}
