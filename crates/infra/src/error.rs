use thiserror::Error;

use storefront_auth::AuthzError;
use storefront_core::{DomainError, VariantId};

use crate::store::StoreError;

/// Error returned by order engine operations.
///
/// Every variant aborts the enclosing unit of work before anything is written.
/// Only `Conflict` is worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// A referenced variant, product, address, voucher or order does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("variant {variant_id} is out of stock (requested {requested}, available {available})")]
    OutOfStock {
        variant_id: VariantId,
        requested: u32,
        available: u32,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The order's status does not allow the requested mutation or transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Concurrent modification detected and the retry budget is spent.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl OrderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Conflict(_))
    }
}

impl From<DomainError> for OrderError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => OrderError::Validation(msg),
            DomainError::InvalidId(msg) => OrderError::Validation(msg),
            DomainError::NotFound(what) => OrderError::NotFound(what),
            DomainError::OutOfStock {
                variant_id,
                requested,
                available,
            } => OrderError::OutOfStock {
                variant_id,
                requested,
                available,
            },
            DomainError::Forbidden(msg) => OrderError::Forbidden(msg),
            DomainError::InvalidState(msg) => OrderError::InvalidState(msg),
            DomainError::Conflict(msg) => OrderError::Conflict(msg),
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => OrderError::Conflict(msg),
            other => OrderError::Store(other),
        }
    }
}

impl From<AuthzError> for OrderError {
    fn from(value: AuthzError) -> Self {
        DomainError::from(value).into()
    }
}
