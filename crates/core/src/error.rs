//! Domain error model.

use thiserror::Error;

use crate::id::VariantId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// stock, authorization, lifecycle). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record (variant, product, address, voucher, order) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A reservation asked for more units than the variant holds.
    #[error("variant {variant_id} is out of stock (requested {requested}, available {available})")]
    OutOfStock {
        variant_id: VariantId,
        requested: u32,
        available: u32,
    },

    /// The caller is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The operation is not permitted from the record's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn out_of_stock(variant_id: VariantId, requested: u32, available: u32) -> Self {
        Self::OutOfStock {
            variant_id,
            requested,
            available,
        }
    }
}
