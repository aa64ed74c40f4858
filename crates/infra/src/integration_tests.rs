//! End-to-end tests for the order pipeline.
//!
//! Tests: request → UnitOfWork → ledger/pricing/vouchers → Order → commit → EventBus
//!
//! Verifies:
//! - Stock is only ever moved together with the order that needs it
//! - Failed operations leave every document untouched
//! - Concurrent checkouts for the last unit cannot both win
//! - Status authorization and transition rules

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};
    use serde_json::Value as JsonValue;

    use storefront_auth::Actor;
    use storefront_core::{
        AddressId, AggregateRoot, Money, OrderId, ProductId, UserId, VariantId, VoucherId,
    };
    use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use storefront_inventory::Variant;
    use storefront_products::Product;
    use storefront_sales::{
        Cart, CartItem, DiscountRule, NewVoucher, Order, OrderFilter, OrderLine, OrderStatus,
        Rejection, ShippingAddress, Voucher,
    };

    use crate::config::CoordinatorConfig;
    use crate::coordinator::{CreateOrderRequest, OrderCoordinator, UpdateOrderRequest};
    use crate::error::OrderError;
    use crate::store::{ChangeSet, CommerceStore, InMemoryCommerceStore, StoreError};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Fixture {
        store: Arc<InMemoryCommerceStore>,
        bus: Bus,
        coordinator: OrderCoordinator<Arc<InMemoryCommerceStore>, Bus>,
        customer: UserId,
        address: AddressId,
        shirt_product: ProductId,
        /// 400 + 100 per unit, 5 in stock.
        shirt: VariantId,
        /// 250 per unit, 1 in stock.
        mug: VariantId,
    }

    fn setup() -> Fixture {
        setup_with(CoordinatorConfig::default())
    }

    fn setup_with(config: CoordinatorConfig) -> Fixture {
        let store = Arc::new(InMemoryCommerceStore::new());
        let customer = UserId::new();

        let shirt_product = ProductId::new();
        store
            .insert_product(Product::new(shirt_product, "Linen Shirt", Money::new(400)).unwrap())
            .unwrap();
        let mug_product = ProductId::new();
        store
            .insert_product(Product::new(mug_product, "Coffee Mug", Money::new(250)).unwrap())
            .unwrap();

        let shirt = VariantId::new();
        store
            .insert_variant(Variant::new(shirt, shirt_product, 5, Money::new(100)))
            .unwrap();
        let mug = VariantId::new();
        store
            .insert_variant(Variant::new(mug, mug_product, 1, Money::ZERO))
            .unwrap();

        let address = AddressId::new();
        store
            .insert_address(
                ShippingAddress::new(address, customer, "Ada", "1 Loop Rd", "Lagos", "ng").unwrap(),
            )
            .unwrap();

        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let coordinator = OrderCoordinator::new(store.clone(), config).with_event_bus(bus.clone());

        Fixture {
            store,
            bus,
            coordinator,
            customer,
            address,
            shirt_product,
            shirt,
            mug,
        }
    }

    impl Fixture {
        fn checkout(&self, lines: Vec<OrderLine>, voucher_ids: Vec<VoucherId>) -> CreateOrderRequest {
            CreateOrderRequest {
                user_id: self.customer,
                lines,
                payment_method: "card".to_string(),
                shipping_address_id: self.address,
                shipping_price: Money::new(50),
                voucher_ids,
            }
        }

        fn place(&self, lines: Vec<OrderLine>) -> Order {
            self.coordinator
                .create_order(self.checkout(lines, Vec::new()))
                .unwrap()
                .order
        }

        fn stock(&self, variant_id: VariantId) -> u32 {
            self.store
                .load_variant(variant_id)
                .unwrap()
                .unwrap()
                .stock_quantity()
        }

        fn voucher(&self, id: VoucherId) -> Voucher {
            self.store.load_voucher(id).unwrap().unwrap()
        }

        fn add_voucher(&self, discount: DiscountRule, usage_limit: u32) -> VoucherId {
            let now = Utc::now();
            self.add_voucher_valid(discount, usage_limit, now - Duration::days(1), now + Duration::days(1))
        }

        fn add_voucher_valid(
            &self,
            discount: DiscountRule,
            usage_limit: u32,
            valid_from: chrono::DateTime<Utc>,
            valid_until: chrono::DateTime<Utc>,
        ) -> VoucherId {
            let id = VoucherId::new();
            let voucher = Voucher::new(NewVoucher {
                id,
                code: format!("CODE-{id}"),
                discount,
                min_order_value: Money::ZERO,
                valid_from,
                valid_until,
                usage_limit,
                applicable_products: BTreeSet::from([self.shirt_product]),
            })
            .unwrap();
            self.store.insert_voucher(voucher).unwrap();
            id
        }

        fn admin(&self) -> Actor {
            Actor::admin(UserId::new())
        }

        fn owner(&self) -> Actor {
            Actor::customer(self.customer)
        }
    }

    #[test]
    fn create_reserves_stock_and_prices_order() {
        let f = setup();

        let order = f.place(vec![OrderLine::new(f.shirt, 2)]);

        assert_eq!(f.stock(f.shirt), 3);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.pricing().products_price, Money::new(1000));
        assert_eq!(order.pricing().shipping_price, Money::new(50));
        assert_eq!(order.pricing().total_price, Money::new(1050));
        assert_eq!(order.payment_method(), "card");

        let stored = f.store.load_order(order.id_typed()).unwrap().unwrap();
        assert_eq!(stored, order);
    }

    #[test]
    fn duplicate_lines_are_merged() {
        let f = setup();

        let order = f.place(vec![OrderLine::new(f.shirt, 1), OrderLine::new(f.shirt, 2)]);

        assert_eq!(order.lines(), &[OrderLine::new(f.shirt, 3)]);
        assert_eq!(f.stock(f.shirt), 2);
    }

    #[test]
    fn create_clears_purchased_cart_lines() {
        let f = setup();
        f.store
            .insert_cart(Cart::new(
                f.customer,
                vec![
                    CartItem { variant_id: f.shirt, quantity: 1 },
                    CartItem { variant_id: f.mug, quantity: 1 },
                ],
            ))
            .unwrap();

        f.place(vec![OrderLine::new(f.shirt, 1)]);

        let cart = f.store.load_cart(f.customer).unwrap().unwrap();
        assert!(!cart.contains(f.shirt));
        assert!(cart.contains(f.mug));
    }

    #[test]
    fn out_of_stock_line_aborts_whole_checkout() {
        let f = setup();
        f.store
            .insert_cart(Cart::new(f.customer, vec![CartItem { variant_id: f.shirt, quantity: 1 }]))
            .unwrap();

        let err = f
            .coordinator
            .create_order(f.checkout(
                vec![OrderLine::new(f.shirt, 1), OrderLine::new(f.mug, 2)],
                Vec::new(),
            ))
            .unwrap_err();

        assert_eq!(
            err,
            OrderError::OutOfStock {
                variant_id: f.mug,
                requested: 2,
                available: 1
            }
        );
        assert_eq!(f.stock(f.shirt), 5);
        assert_eq!(f.stock(f.mug), 1);
        assert!(f.store.list_orders(&OrderFilter::default()).unwrap().is_empty());
        assert!(f.store.load_cart(f.customer).unwrap().unwrap().contains(f.shirt));
    }

    #[test]
    fn concurrent_checkouts_for_last_unit_have_one_winner() {
        let f = setup_with(CoordinatorConfig::default().with_max_conflict_retries(64));
        let buyers = 8;

        let results: Vec<Result<_, OrderError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..buyers)
                .map(|_| {
                    scope.spawn(|| {
                        f.coordinator
                            .create_order(f.checkout(vec![OrderLine::new(f.mug, 1)], Vec::new()))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            OrderError::OutOfStock { requested: 1, available: 0, .. } | OrderError::Conflict(_)
        )));
        assert_eq!(f.stock(f.mug), 0);
        assert_eq!(f.store.list_orders(&OrderFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn percentage_voucher_discounts_products_price() {
        let f = setup();
        let ten_percent = f.add_voucher(DiscountRule::Percentage { percent: 10 }, 5);

        let outcome = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 2)], vec![ten_percent]))
            .unwrap();

        assert_eq!(outcome.order.pricing().voucher_discount, Money::new(100));
        assert_eq!(outcome.order.pricing().total_price, Money::new(950));
        assert_eq!(outcome.order.applied_vouchers(), &[ten_percent]);
        assert_eq!(f.voucher(ten_percent).used(), 1);
    }

    #[test]
    fn fixed_voucher_respects_its_cap() {
        let f = setup();
        let capped = f.add_voucher(
            DiscountRule::FixedAmount {
                amount: Money::new(50),
                max_discount: Some(Money::new(30)),
            },
            5,
        );

        let outcome = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 1)], vec![capped]))
            .unwrap();

        assert_eq!(outcome.vouchers.total_discount, Money::new(30));
        assert_eq!(outcome.order.pricing().total_price, Money::new(520));
    }

    #[test]
    fn ineligible_vouchers_are_reported_not_applied() {
        let f = setup();
        let now = Utc::now();
        let expired = f.add_voucher_valid(
            DiscountRule::Percentage { percent: 50 },
            5,
            now - Duration::days(10),
            now - Duration::days(1),
        );
        let unknown = VoucherId::new();

        let outcome = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 1)], vec![expired, unknown]))
            .unwrap();

        let reasons: Vec<_> = outcome.vouchers.rejected.iter().map(|r| (r.voucher_id, r.reason)).collect();
        assert_eq!(reasons, vec![(expired, Rejection::Expired), (unknown, Rejection::NotFound)]);
        assert!(outcome.order.applied_vouchers().is_empty());
        assert_eq!(outcome.order.pricing().total_price, Money::new(550));
        assert_eq!(f.voucher(expired).used(), 0);
    }

    #[test]
    fn exhausted_voucher_is_not_applied() {
        let f = setup();
        let once = f.add_voucher(DiscountRule::Percentage { percent: 10 }, 1);

        f.coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 1)], vec![once]))
            .unwrap();
        let second = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 1)], vec![once]))
            .unwrap();

        assert_eq!(second.vouchers.rejected[0].reason, Rejection::UsageLimitReached);
        assert_eq!(f.voucher(once).used(), 1);
    }

    #[test]
    fn shipping_to_someone_elses_address_is_forbidden() {
        let f = setup();
        let stranger_address = AddressId::new();
        f.store
            .insert_address(
                ShippingAddress::new(stranger_address, UserId::new(), "Bob", "2 Main St", "Oslo", "NO")
                    .unwrap(),
            )
            .unwrap();

        let mut request = f.checkout(vec![OrderLine::new(f.shirt, 1)], Vec::new());
        request.shipping_address_id = stranger_address;

        assert!(matches!(
            f.coordinator.create_order(request),
            Err(OrderError::Forbidden(_))
        ));
        assert_eq!(f.stock(f.shirt), 5);
    }

    #[test]
    fn update_moves_only_the_difference_in_stock() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 2)]);

        let grown = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 4)]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(f.stock(f.shirt), 1);
        assert_eq!(grown.order.pricing().products_price, Money::new(2000));

        let shrunk = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 1), OrderLine::new(f.mug, 1)]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(f.stock(f.shirt), 4);
        assert_eq!(f.stock(f.mug), 0);
        assert_eq!(shrunk.order.pricing().products_price, Money::new(750));
        assert_eq!(shrunk.order.pricing().total_price, Money::new(800));
        assert_eq!(shrunk.order.shipping_address_id(), f.address);
    }

    #[test]
    fn failed_update_changes_nothing() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 2)]);

        let err = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 1), OrderLine::new(f.mug, 3)]),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, OrderError::OutOfStock { requested: 3, .. }));
        assert_eq!(f.stock(f.shirt), 3);
        assert_eq!(f.stock(f.mug), 1);
        assert_eq!(f.store.load_order(order.id_typed()).unwrap().unwrap(), order);
    }

    #[test]
    fn zero_quantity_line_is_dropped_and_its_stock_returned() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 2), OrderLine::new(f.mug, 1)]);
        assert_eq!(f.stock(f.mug), 0);

        let revised = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 2), OrderLine::new(f.mug, 0)]),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(revised.order.lines(), &[OrderLine::new(f.shirt, 2)]);
        assert_eq!(revised.order.pricing().products_price, Money::new(1000));
        assert_eq!(f.stock(f.mug), 1);
        assert_eq!(f.stock(f.shirt), 3);

        let err = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 0)]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        assert_eq!(f.stock(f.shirt), 3);
    }

    #[test]
    fn updating_a_shipped_order_is_invalid() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 2)]);
        f.coordinator
            .set_order_status(order.id_typed(), f.admin(), OrderStatus::Shipped)
            .unwrap();
        let shipped = f.store.load_order(order.id_typed()).unwrap().unwrap();

        let err = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 1)]),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidState(_)));
        assert_eq!(f.stock(f.shirt), 3);
        assert_eq!(f.store.load_order(order.id_typed()).unwrap().unwrap(), shipped);
    }

    #[test]
    fn removing_a_voucher_returns_its_use() {
        let f = setup();
        let voucher = f.add_voucher(DiscountRule::Percentage { percent: 10 }, 5);
        let order = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 2)], vec![voucher]))
            .unwrap()
            .order;
        assert_eq!(f.voucher(voucher).used(), 1);

        // Untouched vouchers stay applied without a second redemption.
        let kept = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    lines: Some(vec![OrderLine::new(f.shirt, 1)]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(kept.order.pricing().voucher_discount, Money::new(50));
        assert_eq!(f.voucher(voucher).used(), 1);

        let dropped = f
            .coordinator
            .update_order(
                order.id_typed(),
                f.owner(),
                UpdateOrderRequest {
                    voucher_ids: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(dropped.order.applied_vouchers().is_empty());
        assert_eq!(dropped.order.pricing().total_price, Money::new(550));
        assert_eq!(f.voucher(voucher).used(), 0);
    }

    #[test]
    fn customers_cannot_update_foreign_orders() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);

        let err = f
            .coordinator
            .update_order(
                order.id_typed(),
                Actor::customer(UserId::new()),
                UpdateOrderRequest::default(),
            )
            .unwrap_err();
        assert!(matches!(err, OrderError::Forbidden(_)));
    }

    #[test]
    fn customer_requesting_delivered_is_forbidden() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);

        let err = f
            .coordinator
            .set_order_status(order.id_typed(), f.owner(), OrderStatus::Delivered)
            .unwrap_err();

        assert!(matches!(err, OrderError::Forbidden(_)));
        assert_eq!(f.store.load_order(order.id_typed()).unwrap().unwrap().status(), OrderStatus::Pending);
    }

    #[test]
    fn setting_the_current_status_is_a_no_op() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);
        let events = f.bus.subscribe();

        let same = f
            .coordinator
            .set_order_status(order.id_typed(), f.admin(), OrderStatus::Pending)
            .unwrap();

        assert_eq!(same, order);
        assert_eq!(f.store.load_order(order.id_typed()).unwrap().unwrap().version(), order.version());
        assert!(events.drain().is_empty());
    }

    #[test]
    fn cancelling_returns_stock_and_voucher_uses() {
        let f = setup();
        let voucher = f.add_voucher(DiscountRule::Percentage { percent: 10 }, 5);
        let order = f
            .coordinator
            .create_order(f.checkout(
                vec![OrderLine::new(f.shirt, 2), OrderLine::new(f.mug, 1)],
                vec![voucher],
            ))
            .unwrap()
            .order;

        let cancelled = f
            .coordinator
            .set_order_status(order.id_typed(), f.owner(), OrderStatus::Cancelled)
            .unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at().is_some());
        assert_eq!(f.stock(f.shirt), 5);
        assert_eq!(f.stock(f.mug), 1);
        assert_eq!(f.voucher(voucher).used(), 0);
    }

    #[test]
    fn cancelling_twice_releases_only_once() {
        let f = setup();
        let voucher = f.add_voucher(DiscountRule::Percentage { percent: 10 }, 5);
        let order = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.shirt, 2)], vec![voucher]))
            .unwrap()
            .order;

        let cancelled = f
            .coordinator
            .set_order_status(order.id_typed(), f.owner(), OrderStatus::Cancelled)
            .unwrap();
        let events = f.bus.subscribe();
        let again = f
            .coordinator
            .set_order_status(order.id_typed(), f.owner(), OrderStatus::Cancelled)
            .unwrap();

        assert_eq!(again, cancelled);
        assert_eq!(f.stock(f.shirt), 5);
        assert_eq!(f.voucher(voucher).used(), 0);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn shipped_orders_cannot_be_cancelled() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);
        f.coordinator
            .set_order_status(order.id_typed(), f.admin(), OrderStatus::Shipped)
            .unwrap();

        let err = f
            .coordinator
            .set_order_status(order.id_typed(), f.owner(), OrderStatus::Cancelled)
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidState(_)));
        assert_eq!(f.stock(f.shirt), 4);
    }

    #[test]
    fn admin_may_skip_straight_to_delivered() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);

        let delivered = f
            .coordinator
            .set_order_status(order.id_typed(), f.admin(), OrderStatus::Delivered)
            .unwrap();

        assert_eq!(delivered.status(), OrderStatus::Delivered);
        assert!(delivered.delivered_at().is_some());

        let err = f
            .coordinator
            .set_order_status(order.id_typed(), f.admin(), OrderStatus::Processing)
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidState(_)));
    }

    #[test]
    fn unknown_order_is_not_found() {
        let f = setup();
        let err = f
            .coordinator
            .set_order_status(OrderId::new(), f.admin(), OrderStatus::Shipped)
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound(_)));
    }

    #[test]
    fn customer_batch_for_non_cancel_status_is_refused_upfront() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);

        let err = f
            .coordinator
            .set_order_status_batch(&[order.id_typed()], f.owner(), OrderStatus::Shipped)
            .unwrap_err();

        assert!(matches!(err, OrderError::Forbidden(_)));
        assert_eq!(f.store.load_order(order.id_typed()).unwrap().unwrap().status(), OrderStatus::Pending);
    }

    #[test]
    fn batch_reports_each_order() {
        let f = setup();
        let open = f.place(vec![OrderLine::new(f.shirt, 1)]);
        let delivered = f.place(vec![OrderLine::new(f.shirt, 1)]);
        f.coordinator
            .set_order_status(delivered.id_typed(), f.admin(), OrderStatus::Delivered)
            .unwrap();
        let missing = OrderId::new();

        let report = f
            .coordinator
            .set_order_status_batch(
                &[open.id_typed(), delivered.id_typed(), missing, open.id_typed()],
                f.admin(),
                OrderStatus::Cancelled,
            )
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.results[0].0, open.id_typed());
        assert!(matches!(report.results[1].1, Err(OrderError::InvalidState(_))));
        assert!(matches!(report.results[2].1, Err(OrderError::NotFound(_))));
        assert_eq!(f.stock(f.shirt), 4);
    }

    #[test]
    fn committed_events_are_published_in_order() {
        let f = setup();
        let events = f.bus.subscribe();

        let order = f.place(vec![OrderLine::new(f.shirt, 2)]);

        let published = events.drain();
        let types: Vec<&str> = published.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["inventory.variant.stock_reserved", "sales.order.placed"]);
        assert_eq!(published[1].aggregate_id(), *order.id_typed().as_uuid());
        assert_eq!(published[1].sequence_number(), 1);
        assert_eq!(published[0].sequence_number(), 2);
    }

    #[test]
    fn aborted_operations_publish_nothing() {
        let f = setup();
        let events = f.bus.subscribe();

        let _ = f
            .coordinator
            .create_order(f.checkout(vec![OrderLine::new(f.mug, 9)], Vec::new()));

        assert!(events.drain().is_empty());
    }

    #[test]
    fn customers_only_see_their_own_orders() {
        let f = setup();
        let order = f.place(vec![OrderLine::new(f.shirt, 1)]);
        let stranger = Actor::customer(UserId::new());

        assert!(f
            .coordinator
            .list_orders(OrderFilter::default(), stranger)
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.coordinator.get_order(order.id_typed(), stranger),
            Err(OrderError::Forbidden(_))
        ));
        assert_eq!(f.coordinator.get_order(order.id_typed(), f.owner()).unwrap(), order);
        assert_eq!(
            f.coordinator
                .list_orders(OrderFilter::default(), f.admin())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn orders_can_be_filtered_by_product_name_and_status() {
        let f = setup();
        let shirts = f.place(vec![OrderLine::new(f.shirt, 1)]);
        let mugs = f.place(vec![OrderLine::new(f.mug, 1)]);
        f.coordinator
            .set_order_status(mugs.id_typed(), f.admin(), OrderStatus::Processing)
            .unwrap();

        let by_name = f
            .coordinator
            .list_orders(OrderFilter::default().with_product_name("LINEN"), f.owner())
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id_typed(), shirts.id_typed());

        let processing = f
            .coordinator
            .list_orders(
                OrderFilter::default().with_status(OrderStatus::Processing),
                f.owner(),
            )
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id_typed(), mugs.id_typed());
    }

    /// Store whose commits always lose the race.
    struct Contended {
        inner: InMemoryCommerceStore,
        commits: AtomicUsize,
    }

    impl CommerceStore for Contended {
        fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError> {
            self.inner.load_variant(id)
        }
        fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
            self.inner.load_product(id)
        }
        fn load_voucher(&self, id: VoucherId) -> Result<Option<Voucher>, StoreError> {
            self.inner.load_voucher(id)
        }
        fn load_address(&self, id: AddressId) -> Result<Option<ShippingAddress>, StoreError> {
            self.inner.load_address(id)
        }
        fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.load_order(id)
        }
        fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
            self.inner.load_cart(user_id)
        }
        fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
            self.inner.list_orders(filter)
        }
        fn commit(&self, _changes: ChangeSet) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Concurrency("variant moved".to_string()))
        }
    }

    #[test]
    fn conflicts_are_retried_then_reported() {
        let inner = InMemoryCommerceStore::new();
        let product = ProductId::new();
        inner
            .insert_product(Product::new(product, "Tea", Money::new(10)).unwrap())
            .unwrap();
        let variant = VariantId::new();
        inner
            .insert_variant(Variant::new(variant, product, 3, Money::ZERO))
            .unwrap();
        let user = UserId::new();
        let address = AddressId::new();
        inner
            .insert_address(ShippingAddress::new(address, user, "Kim", "3 Hill", "Seoul", "KR").unwrap())
            .unwrap();

        let store = Contended {
            inner,
            commits: AtomicUsize::new(0),
        };
        let coordinator = OrderCoordinator::new(store, CoordinatorConfig::default().with_max_conflict_retries(2));

        let err = coordinator
            .create_order(CreateOrderRequest {
                user_id: user,
                lines: vec![OrderLine::new(variant, 1)],
                payment_method: "cash".to_string(),
                shipping_address_id: address,
                shipping_price: Money::ZERO,
                voucher_ids: Vec::new(),
            })
            .unwrap_err();

        assert!(matches!(err, OrderError::Conflict(_)));
        assert!(err.is_retryable());
        assert_eq!(coordinator.store().commits.load(Ordering::SeqCst), 3);
        assert_eq!(
            coordinator.store().load_variant(variant).unwrap().unwrap().stock_quantity(),
            3
        );
    }
}
