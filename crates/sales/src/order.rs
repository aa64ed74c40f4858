use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_auth::Actor;
use storefront_core::{
    AddressId, Aggregate, AggregateRoot, DomainError, DomainResult, OrderId, UserId, ValueObject,
    VariantId, VoucherId,
};
use storefront_events::Event;

use crate::pricing::OrderPricing;
use crate::status::{OrderStatus, Transition, check_transition};

/// Order line: variant and quantity (always > 0 once stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl ValueObject for OrderLine {}

impl OrderLine {
    pub fn new(variant_id: VariantId, quantity: u32) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }

    /// Merge repeated variants (quantities summed, first position kept) and
    /// drop zero-quantity lines. Fails when no line is left.
    pub fn normalize(lines: &[OrderLine]) -> DomainResult<Vec<OrderLine>> {
        let mut merged: Vec<OrderLine> = Vec::with_capacity(lines.len());
        for line in lines.iter().filter(|l| l.quantity > 0) {
            match merged.iter_mut().find(|m| m.variant_id == line.variant_id) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .checked_add(line.quantity)
                        .ok_or_else(|| DomainError::validation("line quantity overflow"))?;
                }
                None => merged.push(*line),
            }
        }
        if merged.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        Ok(merged)
    }
}

fn quantities(lines: &[OrderLine]) -> BTreeMap<VariantId, i64> {
    let mut map = BTreeMap::new();
    for line in lines {
        *map.entry(line.variant_id).or_insert(0) += i64::from(line.quantity);
    }
    map
}

/// Signed stock movement per variant when an order's lines go from `current`
/// to `requested`. Positive means more units must be reserved. Unchanged
/// variants are omitted.
pub fn stock_deltas(current: &[OrderLine], requested: &[OrderLine]) -> BTreeMap<VariantId, i64> {
    let before = quantities(current);
    let after = quantities(requested);

    let mut deltas = BTreeMap::new();
    for variant_id in before.keys().chain(after.keys()) {
        let delta = after.get(variant_id).copied().unwrap_or(0)
            - before.get(variant_id).copied().unwrap_or(0);
        if delta != 0 {
            deltas.insert(*variant_id, delta);
        }
    }
    deltas
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    payment_method: String,
    shipping_address_id: AddressId,
    applied_vouchers: Vec<VoucherId>,
    pricing: OrderPricing,
    status: OrderStatus,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            user_id: UserId::default(),
            lines: Vec::new(),
            payment_method: String::new(),
            shipping_address_id: AddressId::default(),
            applied_vouchers: Vec::new(),
            pricing: OrderPricing::default(),
            status: OrderStatus::Pending,
            created_at: None,
            updated_at: None,
            delivered_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn shipping_address_id(&self) -> AddressId {
        self.shipping_address_id
    }

    pub fn applied_vouchers(&self) -> &[VoucherId] {
        &self.applied_vouchers
    }

    pub fn pricing(&self) -> OrderPricing {
        self.pricing
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    pub fn is_modifiable(&self) -> bool {
        self.status.allows_content_mutation()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. Prices and vouchers are already resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub payment_method: String,
    pub shipping_address_id: AddressId,
    pub applied_vouchers: Vec<VoucherId>,
    pub pricing: OrderPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseOrder (replace lines, address and vouchers of an open order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseOrder {
    pub order_id: OrderId,
    pub lines: Vec<OrderLine>,
    pub shipping_address_id: AddressId,
    pub applied_vouchers: Vec<VoucherId>,
    pub pricing: OrderPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub actor: Actor,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ReviseOrder(ReviseOrder),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub payment_method: String,
    pub shipping_address_id: AddressId,
    pub applied_vouchers: Vec<VoucherId>,
    pub pricing: OrderPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRevised {
    pub order_id: OrderId,
    pub lines: Vec<OrderLine>,
    pub shipping_address_id: AddressId,
    pub applied_vouchers: Vec<VoucherId>,
    pub pricing: OrderPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderRevised(OrderRevised),
    OrderStatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "sales.order.placed",
            OrderEvent::OrderRevised(_) => "sales.order.revised",
            OrderEvent::OrderStatusChanged(_) => "sales.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderRevised(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.user_id = e.user_id;
                self.lines = e.lines.clone();
                self.payment_method = e.payment_method.clone();
                self.shipping_address_id = e.shipping_address_id;
                self.applied_vouchers = e.applied_vouchers.clone();
                self.pricing = e.pricing;
                self.status = OrderStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderRevised(e) => {
                self.lines = e.lines.clone();
                self.shipping_address_id = e.shipping_address_id;
                self.applied_vouchers = e.applied_vouchers.clone();
                self.pricing = e.pricing;
                self.updated_at = Some(e.occurred_at);
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
                match e.to {
                    OrderStatus::Delivered => self.delivered_at = Some(e.occurred_at),
                    OrderStatus::Cancelled => self.cancelled_at = Some(e.occurred_at),
                    _ => {}
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ReviseOrder(cmd) => self.handle_revise(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::validation("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_placed(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {}", self.id)));
        }
        Ok(())
    }

    fn ensure_lines(lines: &[OrderLine]) -> Result<(), DomainError> {
        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(DomainError::validation(format!(
                "quantity for variant {} must be positive",
                line.variant_id
            )));
        }
        let normalized = OrderLine::normalize(lines)?;
        if normalized.len() != lines.len() {
            return Err(DomainError::validation("order lines must not repeat a variant"));
        }
        Ok(())
    }

    fn ensure_pricing(pricing: &OrderPricing) -> Result<(), DomainError> {
        if !pricing.reconciles() {
            return Err(DomainError::validation(
                "total price does not equal products + shipping - discount",
            ));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;
        Self::ensure_lines(&cmd.lines)?;
        Self::ensure_pricing(&cmd.pricing)?;

        let payment_method = cmd.payment_method.trim();
        if payment_method.is_empty() {
            return Err(DomainError::validation("payment method is required"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            lines: cmd.lines.clone(),
            payment_method: payment_method.to_string(),
            shipping_address_id: cmd.shipping_address_id,
            applied_vouchers: cmd.applied_vouchers.clone(),
            pricing: cmd.pricing,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed()?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invalid_state(format!(
                "cannot modify an order that is {}",
                self.status
            )));
        }

        Self::ensure_lines(&cmd.lines)?;
        Self::ensure_pricing(&cmd.pricing)?;

        Ok(vec![OrderEvent::OrderRevised(OrderRevised {
            order_id: cmd.order_id,
            lines: cmd.lines.clone(),
            shipping_address_id: cmd.shipping_address_id,
            applied_vouchers: cmd.applied_vouchers.clone(),
            pricing: cmd.pricing,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed()?;
        self.ensure_order_id(cmd.order_id)?;

        match check_transition(&cmd.actor, self.user_id, self.status, cmd.status)? {
            Transition::Unchanged => Ok(Vec::new()),
            Transition::Move { from, to } => {
                Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
                    order_id: cmd.order_id,
                    from,
                    to,
                    changed_by: cmd.actor.user_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::order_total;
    use storefront_core::Money;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_pricing() -> OrderPricing {
        order_total(Money::new(1000), Money::new(50), Money::new(100)).unwrap()
    }

    fn place_cmd(order_id: OrderId, user_id: UserId) -> PlaceOrder {
        PlaceOrder {
            order_id,
            user_id,
            lines: vec![OrderLine::new(VariantId::new(), 2)],
            payment_method: "cod".to_string(),
            shipping_address_id: AddressId::new(),
            applied_vouchers: Vec::new(),
            pricing: test_pricing(),
            occurred_at: test_time(),
        }
    }

    fn placed_order(user_id: UserId) -> Order {
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        order
            .execute(&OrderCommand::PlaceOrder(place_cmd(order_id, user_id)))
            .unwrap();
        order
    }

    fn change(order: &Order, actor: Actor, status: OrderStatus) -> OrderCommand {
        OrderCommand::ChangeStatus(ChangeStatus {
            order_id: order.id_typed(),
            actor,
            status,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn place_order_emits_order_placed_event() {
        let order_id = OrderId::new();
        let user_id = UserId::new();
        let order = Order::empty(order_id);

        let events = order
            .handle(&OrderCommand::PlaceOrder(place_cmd(order_id, user_id)))
            .unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            OrderEvent::OrderPlaced(e) => {
                assert_eq!(e.order_id, order_id);
                assert_eq!(e.user_id, user_id);
                assert_eq!(e.pricing.total_price, Money::new(950));
            }
            _ => panic!("Expected OrderPlaced event"),
        }
    }

    #[test]
    fn placed_order_starts_pending_at_version_one() {
        let order = placed_order(UserId::new());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.version(), 1);
        assert!(order.is_placed());
        assert_eq!(order.created_at(), order.updated_at());
    }

    #[test]
    fn placing_twice_is_a_conflict() {
        let order = placed_order(UserId::new());
        let err = order
            .handle(&OrderCommand::PlaceOrder(place_cmd(order.id_typed(), order.user_id())))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn place_rejects_blank_payment_method_and_bad_totals() {
        let order_id = OrderId::new();
        let order = Order::empty(order_id);

        let mut cmd = place_cmd(order_id, UserId::new());
        cmd.payment_method = "  ".to_string();
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(cmd)),
            Err(DomainError::Validation(_))
        ));

        let mut cmd = place_cmd(order_id, UserId::new());
        cmd.pricing.total_price = Money::new(1);
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn revising_a_shipped_order_is_invalid_state() {
        let mut order = placed_order(UserId::new());
        order
            .execute(&change(&order, Actor::admin(UserId::new()), OrderStatus::Shipped))
            .unwrap();
        let before = order.clone();

        let err = order
            .handle(&OrderCommand::ReviseOrder(ReviseOrder {
                order_id: order.id_typed(),
                lines: vec![OrderLine::new(VariantId::new(), 1)],
                shipping_address_id: order.shipping_address_id(),
                applied_vouchers: Vec::new(),
                pricing: test_pricing(),
                occurred_at: test_time(),
            }))
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(order, before);
    }

    #[test]
    fn customer_cancel_sets_cancelled_at() {
        let owner = UserId::new();
        let mut order = placed_order(owner);

        let events = order
            .execute(&change(&order, Actor::customer(owner), OrderStatus::Cancelled))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(order.cancelled_at().is_some());
        assert!(order.delivered_at().is_none());
    }

    #[test]
    fn delivered_sets_delivered_at() {
        let mut order = placed_order(UserId::new());
        order
            .execute(&change(&order, Actor::admin(UserId::new()), OrderStatus::Delivered))
            .unwrap();
        assert!(order.delivered_at().is_some());
    }

    #[test]
    fn repeating_current_status_emits_nothing() {
        let mut order = placed_order(UserId::new());
        let admin = Actor::admin(UserId::new());
        order.execute(&change(&order, admin, OrderStatus::Processing)).unwrap();
        let version = order.version();

        let events = order.execute(&change(&order, admin, OrderStatus::Processing)).unwrap();

        assert!(events.is_empty());
        assert_eq!(order.version(), version);
    }

    #[test]
    fn status_change_on_missing_order_is_not_found() {
        let order = Order::empty(OrderId::new());
        let err = order
            .handle(&change(&order, Actor::admin(UserId::new()), OrderStatus::Shipped))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn normalize_merges_duplicates_in_first_position() {
        let a = VariantId::new();
        let b = VariantId::new();
        let merged = OrderLine::normalize(&[
            OrderLine::new(a, 1),
            OrderLine::new(b, 2),
            OrderLine::new(a, 3),
        ])
        .unwrap();
        assert_eq!(merged, vec![OrderLine::new(a, 4), OrderLine::new(b, 2)]);

        assert!(OrderLine::normalize(&[]).is_err());
        assert!(OrderLine::normalize(&[OrderLine::new(a, 0)]).is_err());
    }

    #[test]
    fn normalize_drops_zero_quantity_lines() {
        let a = VariantId::new();
        let b = VariantId::new();
        let kept = OrderLine::normalize(&[
            OrderLine::new(a, 2),
            OrderLine::new(b, 0),
            OrderLine::new(a, 0),
        ])
        .unwrap();
        assert_eq!(kept, vec![OrderLine::new(a, 2)]);
    }

    #[test]
    fn stock_deltas_cover_added_removed_and_changed_lines() {
        let kept = VariantId::new();
        let grown = VariantId::new();
        let dropped = VariantId::new();
        let added = VariantId::new();

        let deltas = stock_deltas(
            &[
                OrderLine::new(kept, 1),
                OrderLine::new(grown, 2),
                OrderLine::new(dropped, 3),
            ],
            &[
                OrderLine::new(kept, 1),
                OrderLine::new(grown, 5),
                OrderLine::new(added, 4),
            ],
        );

        assert_eq!(deltas.get(&kept), None);
        assert_eq!(deltas.get(&grown), Some(&3));
        assert_eq!(deltas.get(&dropped), Some(&-3));
        assert_eq!(deltas.get(&added), Some(&4));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = placed_order(UserId::new());
        let before = order.clone();

        let _ = order.handle(&change(&order, Actor::admin(UserId::new()), OrderStatus::Shipped));

        assert_eq!(order, before);
    }

    #[test]
    fn apply_is_deterministic() {
        let order_id = OrderId::new();
        let cmd = place_cmd(order_id, UserId::new());
        let events = Order::empty(order_id)
            .handle(&OrderCommand::PlaceOrder(cmd))
            .unwrap();

        let mut a = Order::empty(order_id);
        let mut b = Order::empty(order_id);
        for e in &events {
            a.apply(e);
            b.apply(e);
        }
        assert_eq!(a, b);
    }
}
