//! Orders domain module.
//!
//! Business rules for orders, their pricing, vouchers and status lifecycle,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod address;
pub mod cart;
pub mod order;
pub mod pricing;
pub mod query;
pub mod status;
pub mod voucher;

pub use address::ShippingAddress;
pub use cart::{Cart, CartItem};
pub use order::{
    ChangeStatus, Order, OrderCommand, OrderEvent, OrderLine, OrderPlaced, OrderRevised,
    OrderStatusChanged, PlaceOrder, ReviseOrder, stock_deltas,
};
pub use pricing::{Catalog, OrderPricing, PricedLine, line_total, order_total, price_lines, products_price};
pub use query::OrderFilter;
pub use status::{OrderStatus, Transition, check_transition, ensure_role_may_request};
pub use voucher::{
    AppliedVoucher, DiscountRule, EvaluationContext, NewVoucher, RejectedVoucher, Rejection,
    Voucher, VoucherEvaluation, evaluate,
};
