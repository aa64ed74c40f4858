use serde::{Deserialize, Serialize};

use storefront_core::UserId;

use crate::Role;

/// The authenticated caller of an operation.
///
/// Construction is decoupled from transport: whatever verified the caller's
/// token builds one of these and hands it to the order engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn customer(user_id: UserId) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}
