//! Order status lifecycle and the policy deciding who may move it.

use serde::{Deserialize, Serialize};

use storefront_auth::{Actor, require_owner_or_privileged, require_privileged};
use storefront_core::{DomainError, DomainResult, UserId};

/// Order status lifecycle.
///
/// `Pending -> Processing -> Shipped -> Delivered`, forward only, with
/// `Cancelled` reachable from `Pending` or `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Lines, address and vouchers may only change while the order is open.
    pub fn allows_content_mutation(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    pub fn is_cancellable(self) -> bool {
        self.allows_content_mutation()
    }

    // Position on the fulfilment path; `Cancelled` is off the path.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Processing => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled => None,
        }
    }

    /// Whether `self -> next` is a legal move (forward steps may be skipped).
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        if next == OrderStatus::Cancelled {
            return self.is_cancellable();
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

/// Outcome of a status request that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order already has the requested status; nothing to do.
    Unchanged,
    Move { from: OrderStatus, to: OrderStatus },
}

/// Role-level gate: customers may only ever ask for `Cancelled`.
///
/// Applied before any order is loaded, so a batch request can be refused as a
/// whole.
pub fn ensure_role_may_request(actor: &Actor, requested: OrderStatus) -> DomainResult<()> {
    if requested == OrderStatus::Cancelled {
        return Ok(());
    }
    require_privileged(actor, &format!("setting an order to {requested}"))?;
    Ok(())
}

/// Decide whether `actor` may move an order owned by `owner` from `current` to
/// `requested`.
pub fn check_transition(
    actor: &Actor,
    owner: UserId,
    current: OrderStatus,
    requested: OrderStatus,
) -> DomainResult<Transition> {
    require_owner_or_privileged(actor, owner, "change order status")?;
    ensure_role_may_request(actor, requested)?;

    if current == requested {
        return Ok(Transition::Unchanged);
    }

    if !current.can_transition_to(requested) {
        return Err(DomainError::invalid_state(format!(
            "cannot move order from {current} to {requested}"
        )));
    }

    Ok(Transition::Move {
        from: current,
        to: requested,
    })
}
