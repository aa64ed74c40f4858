//! Order transaction coordinator.
//!
//! Each public operation runs its whole read-decide-stage sequence inside one
//! [`UnitOfWork`] and commits it atomically. A concurrency conflict at commit
//! discards the unit of work and replays the operation against fresh state, up
//! to the configured retry budget and deadline. Committed events are then
//! published on the optional event bus.
//!
//! ```text
//! request
//!   ↓
//! 1. load order / address / vouchers through the unit of work
//!   ↓
//! 2. reserve, release or delta stock per line (ledger)
//!   ↓
//! 3. price lines, evaluate vouchers, total
//!   ↓
//! 4. run the order command (pure decision + apply)
//!   ↓
//! 5. commit change set (compare-and-swap on every written document)
//!   ↓
//! 6. publish envelopes
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use storefront_auth::{Actor, require_owner_or_privileged};
use storefront_core::{AddressId, Money, OrderId, ProductId, UserId, VoucherId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_sales::{
    ChangeStatus, EvaluationContext, Order, OrderCommand, OrderFilter, OrderLine, OrderStatus,
    PlaceOrder, PricedLine, ReviseOrder, VoucherEvaluation, ensure_role_may_request, evaluate,
    order_total, price_lines, products_price, stock_deltas,
};

use crate::config::CoordinatorConfig;
use crate::error::OrderError;
use crate::ledger::InventoryLedger;
use crate::store::{CommerceStore, StoreError};
use crate::unit_of_work::{PendingEvent, UnitOfWork};

/// Checkout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub payment_method: String,
    pub shipping_address_id: AddressId,
    pub shipping_price: Money,
    pub voucher_ids: Vec<VoucherId>,
}

/// Content changes to an open order. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOrderRequest {
    pub shipping_address_id: Option<AddressId>,
    pub lines: Option<Vec<OrderLine>>,
    pub voucher_ids: Option<Vec<VoucherId>>,
}

/// A committed order together with the voucher decisions made for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    pub order: Order,
    pub vouchers: VoucherEvaluation,
}

/// Per-order results of a batch status change, in request order.
#[derive(Debug)]
pub struct BatchStatusReport {
    pub status: OrderStatus,
    pub results: Vec<(OrderId, Result<Order, OrderError>)>,
}

impl BatchStatusReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (OrderId, &OrderError)> + '_ {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e)))
    }
}

/// Application-level orchestration of order operations over a [`CommerceStore`].
#[derive(Debug)]
pub struct OrderCoordinator<S, B = InMemoryEventBus<EventEnvelope<JsonValue>>> {
    store: S,
    bus: Option<B>,
    config: CoordinatorConfig,
}

impl<S> OrderCoordinator<S> {
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        Self {
            store,
            bus: None,
            config,
        }
    }
}

impl<S, B> OrderCoordinator<S, B> {
    /// Publish committed events on `bus`.
    pub fn with_event_bus<B2>(self, bus: B2) -> OrderCoordinator<S, B2> {
        OrderCoordinator {
            store: self.store,
            bus: Some(bus),
            config: self.config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

impl<S, B> OrderCoordinator<S, B>
where
    S: CommerceStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `work` in a fresh unit of work and commit it, retrying from scratch
    /// on concurrency conflicts.
    fn run_in_transaction<'s, T, F>(&'s self, mut work: F) -> Result<T, OrderError>
    where
        F: FnMut(&mut UnitOfWork<'s, S>) -> Result<T, OrderError>,
    {
        let deadline = Instant::now() + self.config.transaction_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let mut uow = UnitOfWork::new(&self.store);
            let value = work(&mut uow)?;
            let staged = uow.staged_writes();

            match uow.commit() {
                Ok(events) => {
                    debug!(attempt, staged, events = events.len(), "unit of work committed");
                    self.publish(&events);
                    return Ok(value);
                }
                Err(StoreError::Concurrency(reason)) => {
                    if attempt > self.config.max_conflict_retries {
                        warn!(attempt, %reason, "giving up after repeated conflicts");
                        return Err(OrderError::Conflict(format!(
                            "gave up after {attempt} attempts: {reason}"
                        )));
                    }
                    if Instant::now() >= deadline {
                        warn!(attempt, %reason, "transaction deadline exceeded");
                        return Err(OrderError::Conflict(format!(
                            "transaction deadline exceeded: {reason}"
                        )));
                    }
                    debug!(attempt, %reason, "concurrent modification, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Publication happens after commit; a failure here is logged, never
    /// rolled back.
    fn publish(&self, events: &[PendingEvent]) {
        let Some(bus) = &self.bus else {
            return;
        };

        for event in events {
            match event.to_envelope() {
                Ok(envelope) => {
                    if let Err(err) = bus.publish(envelope) {
                        warn!(error = ?err, "failed to publish committed event");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize committed event"),
            }
        }
    }

    /// Checkout: reserve stock for every line, price, apply vouchers, place the
    /// order and clear the purchased variants from the user's cart.
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, order_id = tracing::field::Empty),
        err
    )]
    pub fn create_order(&self, request: CreateOrderRequest) -> Result<OrderOutcome, OrderError> {
        let lines = OrderLine::normalize(&request.lines)?;
        let order_id = OrderId::new();
        tracing::Span::current().record("order_id", tracing::field::display(order_id));

        let outcome = self.run_in_transaction(|uow| {
            let now = Utc::now();

            let address = uow.find_address(request.shipping_address_id)?.ok_or_else(|| {
                OrderError::NotFound(format!("address {}", request.shipping_address_id))
            })?;
            if !address.belongs_to(request.user_id) {
                return Err(OrderError::Forbidden(
                    "shipping address belongs to another user".to_string(),
                ));
            }

            for line in &lines {
                InventoryLedger::reserve(uow, line.variant_id, line.quantity, now)?;
            }

            let priced = price_lines(uow, &lines)?;
            let products = products_price(&priced)?;
            let vouchers = evaluate_vouchers(
                uow,
                &request.voucher_ids,
                &priced,
                products,
                &BTreeSet::new(),
                now,
            )?;
            let pricing = order_total(products, request.shipping_price, vouchers.total_discount)?;

            for applied in &vouchers.applied {
                uow.redeem_voucher(applied.voucher_id)?;
            }

            uow.execute_order(
                order_id,
                &OrderCommand::PlaceOrder(PlaceOrder {
                    order_id,
                    user_id: request.user_id,
                    lines: lines.clone(),
                    payment_method: request.payment_method.clone(),
                    shipping_address_id: request.shipping_address_id,
                    applied_vouchers: vouchers.applied_ids(),
                    pricing,
                    occurred_at: now,
                }),
            )?;

            let purchased = lines.iter().map(|l| l.variant_id).collect();
            uow.remove_cart_lines(request.user_id, &purchased)?;

            Ok(OrderOutcome {
                order: uow.load_order(order_id)?,
                vouchers,
            })
        })?;

        info!(
            total = %outcome.order.pricing().total_price,
            rejected_vouchers = outcome.vouchers.rejected.len(),
            "order created"
        );
        Ok(outcome)
    }

    /// Change lines, shipping address or vouchers of an order that is still
    /// pending or processing.
    #[instrument(skip(self, request), fields(actor_id = %actor.user_id), err)]
    pub fn update_order(
        &self,
        order_id: OrderId,
        actor: Actor,
        request: UpdateOrderRequest,
    ) -> Result<OrderOutcome, OrderError> {
        let requested_lines = request
            .lines
            .as_deref()
            .map(OrderLine::normalize)
            .transpose()?;

        let outcome = self.run_in_transaction(|uow| {
            let now = Utc::now();
            let order = uow.load_order(order_id)?;
            require_owner_or_privileged(&actor, order.user_id(), "update order")?;

            if !order.is_modifiable() {
                return Err(OrderError::InvalidState(format!(
                    "cannot modify an order that is {}",
                    order.status()
                )));
            }

            let shipping_address_id = match request.shipping_address_id {
                Some(id) => {
                    let address = uow
                        .find_address(id)?
                        .ok_or_else(|| OrderError::NotFound(format!("address {id}")))?;
                    if !address.belongs_to(order.user_id()) {
                        return Err(OrderError::Forbidden(
                            "shipping address belongs to another user".to_string(),
                        ));
                    }
                    id
                }
                None => order.shipping_address_id(),
            };

            let lines = requested_lines
                .clone()
                .unwrap_or_else(|| order.lines().to_vec());
            for (variant_id, delta) in stock_deltas(order.lines(), &lines) {
                InventoryLedger::delta(uow, variant_id, delta, now)?;
            }

            let priced = price_lines(uow, &lines)?;
            let products = products_price(&priced)?;

            let held: BTreeSet<VoucherId> = order.applied_vouchers().iter().copied().collect();
            let requested_vouchers = request
                .voucher_ids
                .clone()
                .unwrap_or_else(|| order.applied_vouchers().to_vec());
            let vouchers =
                evaluate_vouchers(uow, &requested_vouchers, &priced, products, &held, now)?;
            let pricing = order_total(
                products,
                order.pricing().shipping_price,
                vouchers.total_discount,
            )?;

            let applied: BTreeSet<VoucherId> = vouchers.applied_ids().into_iter().collect();
            for voucher_id in applied.difference(&held) {
                uow.redeem_voucher(*voucher_id)?;
            }
            for voucher_id in held.difference(&applied) {
                uow.release_voucher(*voucher_id)?;
            }

            uow.execute_order(
                order_id,
                &OrderCommand::ReviseOrder(ReviseOrder {
                    order_id,
                    lines,
                    shipping_address_id,
                    applied_vouchers: vouchers.applied_ids(),
                    pricing,
                    occurred_at: now,
                }),
            )?;

            Ok(OrderOutcome {
                order: uow.load_order(order_id)?,
                vouchers,
            })
        })?;

        info!(total = %outcome.order.pricing().total_price, "order updated");
        Ok(outcome)
    }

    /// Move an order to `status`. Requesting the current status changes
    /// nothing. Cancelling returns the order's stock and voucher uses.
    #[instrument(skip(self), fields(actor_id = %actor.user_id), err)]
    pub fn set_order_status(
        &self,
        order_id: OrderId,
        actor: Actor,
        status: OrderStatus,
    ) -> Result<Order, OrderError> {
        self.run_in_transaction(|uow| change_status(uow, order_id, &actor, status, Utc::now()))
    }

    /// Apply one status to many orders. Each order is changed in its own
    /// transaction and reports its own outcome; a customer asking for anything
    /// but `Cancelled` is refused before any order is touched.
    #[instrument(skip(self, order_ids), fields(actor_id = %actor.user_id, count = order_ids.len()), err)]
    pub fn set_order_status_batch(
        &self,
        order_ids: &[OrderId],
        actor: Actor,
        status: OrderStatus,
    ) -> Result<BatchStatusReport, OrderError> {
        ensure_role_may_request(&actor, status)?;

        let mut seen = BTreeSet::new();
        let mut results = Vec::with_capacity(order_ids.len());
        for &order_id in order_ids {
            if !seen.insert(order_id) {
                continue;
            }
            let outcome =
                self.run_in_transaction(|uow| change_status(uow, order_id, &actor, status, Utc::now()));
            results.push((order_id, outcome));
        }

        let report = BatchStatusReport { status, results };
        info!(
            succeeded = report.succeeded(),
            failed = report.results.len() - report.succeeded(),
            "batch status change finished"
        );
        Ok(report)
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id), err)]
    pub fn get_order(&self, order_id: OrderId, actor: Actor) -> Result<Order, OrderError> {
        let order = self
            .store
            .load_order(order_id)?
            .ok_or_else(|| OrderError::NotFound(format!("order {order_id}")))?;
        require_owner_or_privileged(&actor, order.user_id(), "view order")?;
        Ok(order)
    }

    /// Orders matching `filter`, newest first. Customers only see their own.
    #[instrument(skip(self, filter), fields(actor_id = %actor.user_id), err)]
    pub fn list_orders(&self, filter: OrderFilter, actor: Actor) -> Result<Vec<Order>, OrderError> {
        let filter = filter.scoped_to(&actor);
        let candidates = self.store.list_orders(&filter)?;
        if filter.product_name.is_none() {
            return Ok(candidates);
        }

        // Read-only: used as a catalog, never committed.
        let mut catalog = UnitOfWork::new(&self.store);
        let mut matched = Vec::new();
        for order in candidates {
            if filter.matches(&order, &mut catalog)? {
                matched.push(order);
            }
        }
        Ok(matched)
    }
}

fn change_status<S>(
    uow: &mut UnitOfWork<'_, S>,
    order_id: OrderId,
    actor: &Actor,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Order, OrderError>
where
    S: CommerceStore + ?Sized,
{
    let events = uow.execute_order(
        order_id,
        &OrderCommand::ChangeStatus(ChangeStatus {
            order_id,
            actor: *actor,
            status,
            occurred_at: now,
        }),
    )?;
    let order = uow.load_order(order_id)?;

    if events.is_empty() {
        debug!(%order_id, %status, "status unchanged");
        return Ok(order);
    }

    if order.status() == OrderStatus::Cancelled {
        for line in order.lines() {
            InventoryLedger::release(uow, line.variant_id, line.quantity, now)?;
        }
        for voucher_id in order.applied_vouchers() {
            uow.release_voucher(*voucher_id)?;
        }
    }
    Ok(order)
}

fn evaluate_vouchers<S>(
    uow: &mut UnitOfWork<'_, S>,
    requested: &[VoucherId],
    priced: &[PricedLine],
    products_price: Money,
    already_redeemed: &BTreeSet<VoucherId>,
    now: DateTime<Utc>,
) -> Result<VoucherEvaluation, OrderError>
where
    S: CommerceStore + ?Sized,
{
    let products: BTreeSet<ProductId> = priced.iter().map(|l| l.product_id).collect();

    let mut candidates = Vec::with_capacity(requested.len());
    for &voucher_id in requested {
        candidates.push((voucher_id, uow.find_voucher(voucher_id)?));
    }

    let ctx = EvaluationContext {
        now,
        products_price,
        products: &products,
        already_redeemed,
    };
    Ok(evaluate(
        candidates.iter().map(|(id, v)| (*id, v.as_ref())),
        &ctx,
    )?)
}
