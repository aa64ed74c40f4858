use thiserror::Error;

use storefront_core::{DomainError, UserId};

use crate::Actor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {action} requires the admin role")]
    NotPrivileged { action: String },

    #[error("forbidden: {action} on a record owned by another user")]
    NotOwner { action: String },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::Forbidden(value.to_string())
    }
}

/// Require the admin role.
///
/// - No IO
/// - No panics
pub fn require_privileged(actor: &Actor, action: &str) -> Result<(), AuthzError> {
    if actor.is_privileged() {
        Ok(())
    } else {
        Err(AuthzError::NotPrivileged {
            action: action.to_string(),
        })
    }
}

/// Require the admin role, or that the actor owns the record.
pub fn require_owner_or_privileged(
    actor: &Actor,
    owner: UserId,
    action: &str,
) -> Result<(), AuthzError> {
    if actor.is_privileged() || actor.user_id == owner {
        Ok(())
    } else {
        Err(AuthzError::NotOwner {
            action: action.to_string(),
        })
    }
}
