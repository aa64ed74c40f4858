use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use storefront_core::{
    AddressId, AggregateRoot, ExpectedVersion, OrderId, ProductId, UserId, VariantId, VoucherId,
};
use storefront_inventory::Variant;
use storefront_products::Product;
use storefront_sales::{Cart, Order, OrderFilter, ShippingAddress, Voucher};

/// Identity of a versioned document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKey {
    Variant(VariantId),
    Order(OrderId),
    Voucher(VoucherId),
    /// Carts are keyed by their owner (one active cart per user).
    Cart(UserId),
}

impl DocumentKey {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentKey::Variant(_) => "variant",
            DocumentKey::Order(_) => "order",
            DocumentKey::Voucher(_) => "voucher",
            DocumentKey::Cart(_) => "cart",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            DocumentKey::Variant(id) => *id.as_uuid(),
            DocumentKey::Order(id) => *id.as_uuid(),
            DocumentKey::Voucher(id) => *id.as_uuid(),
            DocumentKey::Cart(id) => *id.as_uuid(),
        }
    }
}

impl core::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// A mutable record, as written by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Variant(Variant),
    Order(Order),
    Voucher(Voucher),
    Cart(Cart),
}

impl Document {
    pub fn key(&self) -> DocumentKey {
        match self {
            Document::Variant(v) => DocumentKey::Variant(v.id_typed()),
            Document::Order(o) => DocumentKey::Order(o.id_typed()),
            Document::Voucher(v) => DocumentKey::Voucher(v.id_typed()),
            Document::Cart(c) => DocumentKey::Cart(c.user_id()),
        }
    }

    /// Version the document will have once written.
    pub fn version(&self) -> u64 {
        match self {
            Document::Variant(v) => v.version(),
            Document::Order(o) => o.version(),
            Document::Voucher(v) => v.version(),
            Document::Cart(c) => c.version(),
        }
    }
}

/// One document write guarded by the version it was read at.
///
/// `ExpectedVersion::Exact(0)` means the document must not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrite {
    pub expected: ExpectedVersion,
    pub document: Document,
}

/// Every write of one unit of work. Committed all together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    writes: Vec<StagedWrite>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expected: ExpectedVersion, document: Document) {
        self.writes.push(StagedWrite { expected, document });
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[StagedWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<StagedWrite> {
        self.writes
    }
}

/// Store operation error.
///
/// Infrastructure failures only; business rule violations are `DomainError`s.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A written document moved since it was read (or already existed).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// A stored document could not be decoded or encoded.
    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Versioned document storage for the order engine.
///
/// Reads return `None` for unknown ids. `commit` applies a whole [`ChangeSet`]
/// atomically: every write's expected version is checked against the stored
/// one (a missing document counts as version 0) and a single mismatch rejects
/// the entire set with [`StoreError::Concurrency`].
pub trait CommerceStore: Send + Sync {
    fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError>;

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn load_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, StoreError>;

    fn load_address(&self, id: AddressId) -> Result<Option<ShippingAddress>, StoreError>;

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError>;

    /// Orders passing `filter.matches_record`, newest first. Product-name
    /// filtering is left to the caller.
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

impl<S> CommerceStore for Arc<S>
where
    S: CommerceStore + ?Sized,
{
    fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        (**self).load_variant(id)
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).load_product(id)
    }

    fn load_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, StoreError> {
        (**self).load_voucher(id)
    }

    fn load_address(&self, id: AddressId) -> Result<Option<ShippingAddress>, StoreError> {
        (**self).load_address(id)
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).load_order(id)
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        (**self).load_cart(user_id)
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        (**self).list_orders(filter)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        (**self).commit(changes)
    }
}
