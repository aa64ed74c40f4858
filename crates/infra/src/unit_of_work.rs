//! Unit of work: tracked reads, staged writes, pending events.
//!
//! Everything an order operation reads or changes goes through a
//! [`UnitOfWork`]. Mutable documents remember the version they were loaded at;
//! `commit` turns every changed document into a compare-and-swap write and
//! hands the whole [`ChangeSet`] to the store at once. Dropping a unit of work
//! without committing discards all of its changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value as JsonValue;

use storefront_core::{
    Aggregate, AggregateRoot, AddressId, DomainError, ExpectedVersion, OrderId, ProductId,
    UserId, VariantId, VoucherId,
};
use storefront_events::EventEnvelope;
use storefront_inventory::{InventoryCommand, InventoryEvent, Variant};
use storefront_products::Product;
use storefront_sales::{Cart, Catalog, Order, OrderCommand, OrderEvent, ShippingAddress, Voucher};

use crate::error::OrderError;
use crate::store::{ChangeSet, CommerceStore, Document, StoreError};

/// A domain event produced inside a unit of work, published only after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    Inventory {
        variant_id: VariantId,
        sequence: u64,
        event: InventoryEvent,
    },
    Order {
        order_id: OrderId,
        sequence: u64,
        event: OrderEvent,
    },
}

impl PendingEvent {
    pub fn to_envelope(&self) -> Result<EventEnvelope<JsonValue>, serde_json::Error> {
        match self {
            PendingEvent::Inventory {
                variant_id,
                sequence,
                event,
            } => EventEnvelope::from_typed(
                *variant_id.as_uuid(),
                "inventory.variant",
                *sequence,
                event,
            ),
            PendingEvent::Order {
                order_id,
                sequence,
                event,
            } => EventEnvelope::from_typed(*order_id.as_uuid(), "sales.order", *sequence, event),
        }
    }
}

#[derive(Debug)]
struct Tracked<T> {
    loaded_version: u64,
    current: T,
    dirty: bool,
}

impl<T> Tracked<T> {
    fn loaded(current: T, loaded_version: u64) -> Self {
        Self {
            loaded_version,
            current,
            dirty: false,
        }
    }
}

pub struct UnitOfWork<'s, S: ?Sized> {
    store: &'s S,
    // BTreeMaps: the change set lists writes in key order.
    variants: BTreeMap<VariantId, Tracked<Variant>>,
    vouchers: BTreeMap<VoucherId, Tracked<Voucher>>,
    orders: BTreeMap<OrderId, Tracked<Order>>,
    carts: BTreeMap<UserId, Tracked<Cart>>,
    products: HashMap<ProductId, Product>,
    events: Vec<PendingEvent>,
}

impl<'s, S> UnitOfWork<'s, S>
where
    S: CommerceStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            variants: BTreeMap::new(),
            vouchers: BTreeMap::new(),
            orders: BTreeMap::new(),
            carts: BTreeMap::new(),
            products: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Number of documents that would be written by `commit`.
    pub fn staged_writes(&self) -> usize {
        self.variants.values().filter(|t| t.dirty).count()
            + self.vouchers.values().filter(|t| t.dirty).count()
            + self.orders.values().filter(|t| t.dirty).count()
            + self.carts.values().filter(|t| t.dirty).count()
    }

    pub fn pending_events(&self) -> &[PendingEvent] {
        &self.events
    }

    pub fn find_address(&mut self, id: AddressId) -> Result<Option<ShippingAddress>, OrderError> {
        Ok(self.store.load_address(id)?)
    }

    fn track_variant(&mut self, id: VariantId) -> Result<Option<&mut Tracked<Variant>>, OrderError> {
        if !self.variants.contains_key(&id) {
            let Some(variant) = self.store.load_variant(id)? else {
                return Ok(None);
            };
            let version = variant.version();
            self.variants.insert(id, Tracked::loaded(variant, version));
        }
        Ok(self.variants.get_mut(&id))
    }

    /// Run an inventory command against a variant and stage the result.
    pub fn execute_variant(
        &mut self,
        id: VariantId,
        command: &InventoryCommand,
    ) -> Result<Vec<InventoryEvent>, OrderError> {
        let tracked = self
            .track_variant(id)?
            .ok_or_else(|| DomainError::not_found(format!("variant {id}")))?;

        let base = tracked.current.version();
        let events = tracked.current.execute(command)?;
        if !events.is_empty() {
            tracked.dirty = true;
        }

        for (offset, event) in (1u64..).zip(events.iter()) {
            self.events.push(PendingEvent::Inventory {
                variant_id: id,
                sequence: base + offset,
                event: event.clone(),
            });
        }
        Ok(events)
    }

    fn track_voucher(&mut self, id: VoucherId) -> Result<Option<&mut Tracked<Voucher>>, OrderError> {
        if !self.vouchers.contains_key(&id) {
            let Some(voucher) = self.store.load_voucher(id)? else {
                return Ok(None);
            };
            let version = voucher.version();
            self.vouchers.insert(id, Tracked::loaded(voucher, version));
        }
        Ok(self.vouchers.get_mut(&id))
    }

    pub fn find_voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>, OrderError> {
        Ok(self.track_voucher(id)?.map(|t| t.current.clone()))
    }

    pub fn redeem_voucher(&mut self, id: VoucherId) -> Result<(), OrderError> {
        let tracked = self
            .track_voucher(id)?
            .ok_or_else(|| DomainError::not_found(format!("voucher {id}")))?;
        tracked.current.redeem()?;
        tracked.dirty = true;
        Ok(())
    }

    /// Give back one use. A voucher deleted in the meantime is skipped.
    pub fn release_voucher(&mut self, id: VoucherId) -> Result<(), OrderError> {
        match self.track_voucher(id)? {
            Some(tracked) => {
                tracked.current.release();
                tracked.dirty = true;
            }
            None => tracing::debug!(voucher_id = %id, "released voucher no longer exists"),
        }
        Ok(())
    }

    fn track_order(&mut self, id: OrderId) -> Result<&mut Tracked<Order>, OrderError> {
        if !self.orders.contains_key(&id) {
            let tracked = match self.store.load_order(id)? {
                Some(order) => {
                    let version = order.version();
                    Tracked::loaded(order, version)
                }
                None => Tracked::loaded(Order::empty(id), 0),
            };
            self.orders.insert(id, tracked);
        }
        self.orders
            .get_mut(&id)
            .ok_or_else(|| OrderError::NotFound(format!("order {id}")))
    }

    /// The order as currently staged. `NotFound` if it was never placed.
    pub fn load_order(&mut self, id: OrderId) -> Result<Order, OrderError> {
        let tracked = self.track_order(id)?;
        if !tracked.current.is_placed() {
            return Err(OrderError::NotFound(format!("order {id}")));
        }
        Ok(tracked.current.clone())
    }

    /// Run an order command and stage the result. Unknown ids start from an
    /// empty order, so `PlaceOrder` creates and anything else is `NotFound`.
    pub fn execute_order(
        &mut self,
        id: OrderId,
        command: &OrderCommand,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let tracked = self.track_order(id)?;

        let base = tracked.current.version();
        let events = tracked.current.execute(command)?;
        if !events.is_empty() {
            tracked.dirty = true;
        }

        for (offset, event) in (1u64..).zip(events.iter()) {
            self.events.push(PendingEvent::Order {
                order_id: id,
                sequence: base + offset,
                event: event.clone(),
            });
        }
        Ok(events)
    }

    /// Drop the given variants from the user's cart. Users without a cart are
    /// left alone.
    pub fn remove_cart_lines(
        &mut self,
        user_id: UserId,
        variant_ids: &BTreeSet<VariantId>,
    ) -> Result<usize, OrderError> {
        if !self.carts.contains_key(&user_id) {
            let Some(cart) = self.store.load_cart(user_id)? else {
                return Ok(0);
            };
            let version = cart.version();
            self.carts.insert(user_id, Tracked::loaded(cart, version));
        }
        let Some(tracked) = self.carts.get_mut(&user_id) else {
            return Ok(0);
        };

        let removed = tracked.current.remove_variants(variant_ids);
        if removed > 0 {
            tracked.dirty = true;
        }
        Ok(removed)
    }

    fn change_set(self) -> (ChangeSet, Vec<PendingEvent>) {
        let mut changes = ChangeSet::new();

        for t in self.variants.into_values().filter(|t| t.dirty) {
            changes.push(ExpectedVersion::Exact(t.loaded_version), Document::Variant(t.current));
        }
        for t in self.vouchers.into_values().filter(|t| t.dirty) {
            changes.push(ExpectedVersion::Exact(t.loaded_version), Document::Voucher(t.current));
        }
        for t in self.orders.into_values().filter(|t| t.dirty) {
            changes.push(ExpectedVersion::Exact(t.loaded_version), Document::Order(t.current));
        }
        for t in self.carts.into_values().filter(|t| t.dirty) {
            changes.push(ExpectedVersion::Exact(t.loaded_version), Document::Cart(t.current));
        }

        (changes, self.events)
    }

    /// Write every staged change atomically. On success returns the events to
    /// publish; on failure nothing was written.
    pub fn commit(self) -> Result<Vec<PendingEvent>, StoreError> {
        let store = self.store;
        let (changes, events) = self.change_set();
        store.commit(changes)?;
        Ok(events)
    }
}

impl<S> Catalog for UnitOfWork<'_, S>
where
    S: CommerceStore + ?Sized,
{
    type Error = OrderError;

    fn find_variant(&mut self, id: VariantId) -> Result<Option<Variant>, OrderError> {
        Ok(self.track_variant(id)?.map(|t| t.current.clone()))
    }

    fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, OrderError> {
        if let Some(product) = self.products.get(&id) {
            return Ok(Some(product.clone()));
        }
        let product = self.store.load_product(id)?;
        if let Some(p) = &product {
            self.products.insert(id, p.clone());
        }
        Ok(product)
    }
}
