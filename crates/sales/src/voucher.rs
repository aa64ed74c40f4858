//! Voucher records and the evaluator that decides which vouchers apply to an
//! order.
//!
//! Evaluation never fails because of a single bad voucher: ineligible or
//! unknown vouchers are reported in [`VoucherEvaluation::rejected`] and simply
//! left off the order.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Money, ProductId, VoucherId};

/// How a voucher computes its discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountRule {
    /// `products_price * percent / 100`, rounded down.
    Percentage { percent: u32 },
    /// A flat amount, optionally capped.
    FixedAmount {
        amount: Money,
        max_discount: Option<Money>,
    },
}

impl DiscountRule {
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            DiscountRule::Percentage { percent } if *percent > 100 => Err(
                DomainError::validation("percentage discount cannot exceed 100"),
            ),
            _ => Ok(()),
        }
    }

    pub fn discount_for(&self, products_price: Money) -> Money {
        match *self {
            DiscountRule::Percentage { percent } => products_price.percent(percent),
            DiscountRule::FixedAmount {
                amount,
                max_discount,
            } => max_discount.map_or(amount, |cap| amount.min(cap)),
        }
    }
}

/// Voucher record.
///
/// Invariant: `used <= usage_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    id: VoucherId,
    code: String,
    discount: DiscountRule,
    min_order_value: Money,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    usage_limit: u32,
    used: u32,
    is_active: bool,
    applicable_products: BTreeSet<ProductId>,
    version: u64,
}

/// Input for [`Voucher::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVoucher {
    pub id: VoucherId,
    pub code: String,
    pub discount: DiscountRule,
    pub min_order_value: Money,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: u32,
    pub applicable_products: BTreeSet<ProductId>,
}

impl Voucher {
    pub fn new(input: NewVoucher) -> DomainResult<Self> {
        let code = input.code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("voucher code cannot be empty"));
        }
        input.discount.validate()?;
        if input.valid_until < input.valid_from {
            return Err(DomainError::validation(
                "voucher validity window ends before it starts",
            ));
        }

        Ok(Self {
            id: input.id,
            code,
            discount: input.discount,
            min_order_value: input.min_order_value,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            usage_limit: input.usage_limit,
            used: 0,
            is_active: true,
            applicable_products: input.applicable_products,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> VoucherId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn discount(&self) -> DiscountRule {
        self.discount
    }

    pub fn min_order_value(&self) -> Money {
        self.min_order_value
    }

    pub fn usage_limit(&self) -> u32 {
        self.usage_limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn applicable_products(&self) -> &BTreeSet<ProductId> {
        &self.applicable_products
    }

    pub fn deactivate(&mut self) {
        if self.is_active {
            self.is_active = false;
            self.version += 1;
        }
    }

    /// Record one more use. Fails once the usage limit is reached.
    pub fn redeem(&mut self) -> DomainResult<()> {
        if self.used >= self.usage_limit {
            return Err(DomainError::invalid_state(format!(
                "voucher {} has reached its usage limit",
                self.code
            )));
        }
        self.used += 1;
        self.version += 1;
        Ok(())
    }

    /// Give back one use (order cancelled or voucher removed from it).
    pub fn release(&mut self) {
        if self.used > 0 {
            self.used -= 1;
            self.version += 1;
        }
    }

    /// Check every eligibility rule and return the discount this voucher grants.
    ///
    /// `already_redeemed` is true when the order under evaluation already holds
    /// one of this voucher's uses, so that use does not count against the limit.
    pub fn assess(&self, ctx: &EvaluationContext<'_>, already_redeemed: bool) -> Result<Money, Rejection> {
        if !self.is_active {
            return Err(Rejection::Inactive);
        }
        if ctx.now < self.valid_from {
            return Err(Rejection::NotYetValid);
        }
        if ctx.now > self.valid_until {
            return Err(Rejection::Expired);
        }
        if !already_redeemed && self.used >= self.usage_limit {
            return Err(Rejection::UsageLimitReached);
        }
        if self.applicable_products.is_disjoint(ctx.products) {
            return Err(Rejection::NotApplicable);
        }
        if ctx.products_price < self.min_order_value {
            return Err(Rejection::BelowMinimumOrder {
                min_order_value: self.min_order_value,
            });
        }
        Ok(self.discount.discount_for(ctx.products_price))
    }
}

/// Why a requested voucher was left off the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    /// None of the order's products is in the voucher's scope.
    NotApplicable,
    BelowMinimumOrder { min_order_value: Money },
}

/// Order facts a voucher is judged against.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub now: DateTime<Utc>,
    pub products_price: Money,
    pub products: &'a BTreeSet<ProductId>,
    /// Vouchers the order already holds a use of.
    pub already_redeemed: &'a BTreeSet<VoucherId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVoucher {
    pub voucher_id: VoucherId,
    pub discount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedVoucher {
    pub voucher_id: VoucherId,
    pub reason: Rejection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherEvaluation {
    pub applied: Vec<AppliedVoucher>,
    pub rejected: Vec<RejectedVoucher>,
    /// Sum of applied discounts, before clamping to the products price.
    pub total_discount: Money,
}

impl VoucherEvaluation {
    pub fn applied_ids(&self) -> Vec<VoucherId> {
        self.applied.iter().map(|a| a.voucher_id).collect()
    }
}

/// Evaluate requested vouchers in request order.
///
/// `candidates` pairs every requested id with the record it resolved to
/// (`None` when the id is unknown). Repeated ids are evaluated once.
pub fn evaluate<'v, I>(candidates: I, ctx: &EvaluationContext<'_>) -> DomainResult<VoucherEvaluation>
where
    I: IntoIterator<Item = (VoucherId, Option<&'v Voucher>)>,
{
    let mut seen = BTreeSet::new();
    let mut evaluation = VoucherEvaluation::default();

    for (voucher_id, voucher) in candidates {
        if !seen.insert(voucher_id) {
            continue;
        }

        let outcome = match voucher {
            Some(v) => v.assess(ctx, ctx.already_redeemed.contains(&voucher_id)),
            None => Err(Rejection::NotFound),
        };

        match outcome {
            Ok(discount) => {
                evaluation.total_discount = evaluation.total_discount.checked_add(discount)?;
                evaluation.applied.push(AppliedVoucher {
                    voucher_id,
                    discount,
                });
            }
            Err(reason) => evaluation.rejected.push(RejectedVoucher { voucher_id, reason }),
        }
    }

    Ok(evaluation)
}
