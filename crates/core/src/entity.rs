//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Used for read-only reference records (catalog products, shipping addresses)
/// that are looked up by identity but never versioned by this engine.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
