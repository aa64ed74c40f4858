//! Walks one order through checkout, revision and cancellation against an
//! in-memory catalog, logging every published event.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;

use storefront_auth::Actor;
use storefront_core::{AddressId, Money, ProductId, UserId, VariantId, VoucherId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_infra::{
    CommerceStore, CoordinatorConfig, CreateOrderRequest, InMemoryCommerceStore, OrderCoordinator,
    UpdateOrderRequest,
};
use storefront_inventory::Variant;
use storefront_products::Product;
use storefront_sales::{
    Cart, CartItem, DiscountRule, NewVoucher, OrderLine, OrderStatus, ShippingAddress, Voucher,
};

struct Seed {
    customer: UserId,
    address: AddressId,
    tee: VariantId,
    hoodie: VariantId,
    welcome: VoucherId,
}

fn seed(store: &InMemoryCommerceStore) -> anyhow::Result<Seed> {
    let customer = UserId::new();

    let tee_product = ProductId::new();
    store.insert_product(Product::new(tee_product, "Organic Tee", Money::new(1_500))?)?;
    let hoodie_product = ProductId::new();
    store.insert_product(Product::new(hoodie_product, "Zip Hoodie", Money::new(4_000))?)?;

    let tee = VariantId::new();
    store.insert_variant(Variant::new(tee, tee_product, 10, Money::new(200)))?;
    let hoodie = VariantId::new();
    store.insert_variant(Variant::new(hoodie, hoodie_product, 2, Money::ZERO))?;

    let address = AddressId::new();
    store.insert_address(ShippingAddress::new(
        address,
        customer,
        "Sam Rivera",
        "12 Harbour St",
        "Lisbon",
        "pt",
    )?)?;

    let now = Utc::now();
    let welcome = VoucherId::new();
    store.insert_voucher(Voucher::new(NewVoucher {
        id: welcome,
        code: "WELCOME10".to_string(),
        discount: DiscountRule::Percentage { percent: 10 },
        min_order_value: Money::new(2_000),
        valid_from: now - Duration::days(1),
        valid_until: now + Duration::days(30),
        usage_limit: 100,
        applicable_products: BTreeSet::from([tee_product, hoodie_product]),
    })?)?;

    store.insert_cart(Cart::new(
        customer,
        vec![
            CartItem { variant_id: tee, quantity: 2 },
            CartItem { variant_id: hoodie, quantity: 1 },
        ],
    ))?;

    Ok(Seed {
        customer,
        address,
        tee,
        hoodie,
        welcome,
    })
}

fn main() -> anyhow::Result<()> {
    storefront_observability::init();

    let store = Arc::new(InMemoryCommerceStore::new());
    let seed = seed(&store).context("seeding catalog")?;

    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let events = bus.subscribe();
    let coordinator =
        OrderCoordinator::new(store.clone(), CoordinatorConfig::from_env()).with_event_bus(bus);

    let customer = Actor::customer(seed.customer);
    let created = coordinator
        .create_order(CreateOrderRequest {
            user_id: seed.customer,
            lines: vec![OrderLine::new(seed.tee, 2), OrderLine::new(seed.hoodie, 1)],
            payment_method: "card".to_string(),
            shipping_address_id: seed.address,
            shipping_price: Money::new(500),
            voucher_ids: vec![seed.welcome],
        })
        .context("checkout")?;
    let order_id = created.order.id_typed();
    tracing::info!(
        %order_id,
        total = %created.order.pricing().total_price,
        discount = %created.order.pricing().voucher_discount,
        "checked out"
    );

    let revised = coordinator
        .update_order(
            order_id,
            customer,
            UpdateOrderRequest {
                lines: Some(vec![OrderLine::new(seed.tee, 1)]),
                ..Default::default()
            },
        )
        .context("revising order")?;
    tracing::info!(
        total = %revised.order.pricing().total_price,
        dropped_vouchers = revised.vouchers.rejected.len(),
        "revised"
    );

    let cancelled = coordinator
        .set_order_status(order_id, customer, OrderStatus::Cancelled)
        .context("cancelling order")?;
    tracing::info!(status = %cancelled.status(), "cancelled");

    for variant_id in [seed.tee, seed.hoodie] {
        let stock = store
            .load_variant(variant_id)?
            .map(|v| v.stock_quantity())
            .unwrap_or_default();
        tracing::info!(%variant_id, stock, "stock after cancellation");
    }

    for envelope in events.drain() {
        tracing::info!(
            event_type = envelope.event_type(),
            aggregate_id = %envelope.aggregate_id(),
            sequence = envelope.sequence_number(),
            "published"
        );
    }

    Ok(())
}
