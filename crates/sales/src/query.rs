//! Order listing filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_auth::Actor;
use storefront_core::UserId;

use crate::order::Order;
use crate::pricing::Catalog;
use crate::status::OrderStatus;

/// Criteria for listing orders. Every field left as `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_method: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_until: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
    /// Case-insensitive substring of any ordered product's name.
    pub product_name: Option<String>,
}

impl OrderFilter {
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_until = Some(until);
        self
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_product_name(mut self, needle: impl Into<String>) -> Self {
        self.product_name = Some(needle.into());
        self
    }

    /// Customers only ever see their own orders.
    pub fn scoped_to(mut self, actor: &Actor) -> Self {
        if !actor.is_privileged() {
            self.user_id = Some(actor.user_id);
        }
        self
    }

    /// Checks that need nothing beyond the order record itself.
    pub fn matches_record(&self, order: &Order) -> bool {
        if self.status.is_some_and(|s| s != order.status()) {
            return false;
        }
        if self.user_id.is_some_and(|u| u != order.user_id()) {
            return false;
        }
        if let Some(method) = &self.payment_method {
            if !order.payment_method().eq_ignore_ascii_case(method.trim()) {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if order.created_at().is_none_or(|at| at < from) {
                return false;
            }
        }
        if let Some(until) = self.created_until {
            if order.created_at().is_none_or(|at| at > until) {
                return false;
            }
        }
        true
    }

    /// Full match, resolving product names through `catalog` when needed.
    ///
    /// Lines whose variant or product can no longer be resolved never match a
    /// product-name filter.
    pub fn matches<C>(&self, order: &Order, catalog: &mut C) -> Result<bool, C::Error>
    where
        C: Catalog + ?Sized,
    {
        if !self.matches_record(order) {
            return Ok(false);
        }
        let Some(needle) = &self.product_name else {
            return Ok(true);
        };

        for line in order.lines() {
            let Some(variant) = catalog.find_variant(line.variant_id)? else {
                continue;
            };
            let Some(product) = catalog.find_product(variant.product_id())? else {
                continue;
            };
            if product.name_contains(needle) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
