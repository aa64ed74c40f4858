//! `storefront-auth` — caller identity and authorization checks.
//!
//! Token issuance and verification happen elsewhere; this crate only models the
//! already-authenticated caller and the policy checks applied to it.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, require_owner_or_privileged, require_privileged};
pub use principal::Actor;
pub use roles::Role;
