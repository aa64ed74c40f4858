use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use storefront_core::{
    AddressId, AggregateRoot, OrderId, ProductId, UserId, VariantId, VoucherId,
};
use storefront_inventory::Variant;
use storefront_products::Product;
use storefront_sales::{Cart, Order, OrderFilter, ShippingAddress, Voucher};

use super::r#trait::{ChangeSet, CommerceStore, Document, DocumentKey, StoreError};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    addresses: HashMap<AddressId, ShippingAddress>,
    variants: HashMap<VariantId, Variant>,
    vouchers: HashMap<VoucherId, Voucher>,
    orders: HashMap<OrderId, Order>,
    carts: HashMap<UserId, Cart>,
}

impl State {
    fn stored_version(&self, key: &DocumentKey) -> u64 {
        match key {
            DocumentKey::Variant(id) => self.variants.get(id).map(|v| v.version()),
            DocumentKey::Order(id) => self.orders.get(id).map(|o| o.version()),
            DocumentKey::Voucher(id) => self.vouchers.get(id).map(|v| v.version()),
            DocumentKey::Cart(id) => self.carts.get(id).map(|c| c.version()),
        }
        .unwrap_or(0)
    }

    fn put(&mut self, document: Document) {
        match document {
            Document::Variant(v) => {
                self.variants.insert(v.id_typed(), v);
            }
            Document::Order(o) => {
                self.orders.insert(o.id_typed(), o);
            }
            Document::Voucher(v) => {
                self.vouchers.insert(v.id_typed(), v);
            }
            Document::Cart(c) => {
                self.carts.insert(c.user_id(), c);
            }
        }
    }
}

/// In-memory document store.
///
/// Intended for tests/dev. A commit holds the write lock while it checks and
/// applies the whole change set, so commits are serialized.
#[derive(Debug, Default)]
pub struct InMemoryCommerceStore {
    state: RwLock<State>,
}

impl InMemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    // Seeding. Reference data is maintained outside the order engine, so these
    // bypass version checks.

    pub fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        self.write()?.products.insert(product.id_typed(), product);
        Ok(())
    }

    pub fn insert_address(&self, address: ShippingAddress) -> Result<(), StoreError> {
        self.write()?.addresses.insert(address.id_typed(), address);
        Ok(())
    }

    pub fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        self.write()?.put(Document::Variant(variant));
        Ok(())
    }

    pub fn insert_voucher(&self, voucher: Voucher) -> Result<(), StoreError> {
        self.write()?.put(Document::Voucher(voucher));
        Ok(())
    }

    pub fn insert_cart(&self, cart: Cart) -> Result<(), StoreError> {
        self.write()?.put(Document::Cart(cart));
        Ok(())
    }
}

impl CommerceStore for InMemoryCommerceStore {
    fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        Ok(self.read()?.variants.get(&id).cloned())
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    fn load_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, StoreError> {
        Ok(self.read()?.vouchers.get(&id).cloned())
    }

    fn load_address(&self, id: AddressId) -> Result<Option<ShippingAddress>, StoreError> {
        Ok(self.read()?.addresses.get(&id).cloned())
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        Ok(self.read()?.carts.get(&user_id).cloned())
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.read()?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.matches_record(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(orders)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut state = self.write()?;

        // Check everything before touching anything.
        for write in changes.writes() {
            let key = write.document.key();
            let current = state.stored_version(&key);
            if !write.expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "{key}: expected {:?}, found {current}",
                    write.expected
                )));
            }
        }

        for write in changes.into_writes() {
            state.put(write.document);
        }
        Ok(())
    }
}
