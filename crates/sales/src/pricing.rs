//! Pricing engine: line totals, products price and order totals.
//!
//! Prices are never taken from the caller. Every figure is derived from the
//! catalog records read through a [`Catalog`].

use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Money, ProductId, ValueObject, VariantId};
use storefront_inventory::Variant;
use storefront_products::Product;

use crate::order::OrderLine;

/// Read access to catalog records.
///
/// `&mut self` so implementations may track what was read (a unit of work
/// records the version of every variant it loads). Lookups return `None` for
/// unknown ids; `Error` covers everything else (e.g. storage failures).
pub trait Catalog {
    type Error: From<DomainError>;

    fn find_variant(&mut self, id: VariantId) -> Result<Option<Variant>, Self::Error>;
    fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, Self::Error>;

    fn variant(&mut self, id: VariantId) -> Result<Variant, Self::Error> {
        self.find_variant(id)?
            .ok_or_else(|| DomainError::not_found(format!("variant {id}")).into())
    }

    fn product(&mut self, id: ProductId) -> Result<Product, Self::Error> {
        self.find_product(id)?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")).into())
    }
}

/// A line with its resolved catalog data and price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// `(product.original_price + variant.additional_price) * quantity`.
pub fn line_total(product: &Product, variant: &Variant, quantity: u32) -> DomainResult<Money> {
    product
        .original_price()
        .checked_add(variant.additional_price())?
        .checked_mul(u64::from(quantity))
}

/// Resolve and price every line. Fails with `NotFound` when a variant or its
/// parent product is missing.
pub fn price_lines<C>(catalog: &mut C, lines: &[OrderLine]) -> Result<Vec<PricedLine>, C::Error>
where
    C: Catalog + ?Sized,
{
    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let variant = catalog.variant(line.variant_id)?;
        let product = catalog.product(variant.product_id())?;
        priced.push(PricedLine {
            variant_id: line.variant_id,
            product_id: product.id_typed(),
            quantity: line.quantity,
            unit_price: line_total(&product, &variant, 1)?,
            line_total: line_total(&product, &variant, line.quantity)?,
        });
    }
    Ok(priced)
}

pub fn products_price(lines: &[PricedLine]) -> DomainResult<Money> {
    Money::try_sum(lines.iter().map(|line| line.line_total))
}

/// Price breakdown stored on an order.
///
/// `voucher_discount` is the effective discount, already clamped, so
/// `total_price == products_price + shipping_price - voucher_discount` holds
/// exactly.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPricing {
    pub products_price: Money,
    pub shipping_price: Money,
    pub voucher_discount: Money,
    pub total_price: Money,
}

impl ValueObject for OrderPricing {}

impl OrderPricing {
    pub fn reconciles(&self) -> bool {
        self.products_price
            .checked_add(self.shipping_price)
            .map(|gross| {
                self.voucher_discount <= self.products_price
                    && gross.saturating_sub(self.voucher_discount) == self.total_price
            })
            .unwrap_or(false)
    }
}

/// Combine the three components into an order total.
///
/// A discount larger than the products price is clamped to it, so the total
/// never drops below the shipping price.
pub fn order_total(
    products_price: Money,
    shipping_price: Money,
    voucher_discount: Money,
) -> DomainResult<OrderPricing> {
    let effective = voucher_discount.min(products_price);
    let total_price = products_price
        .saturating_sub(effective)
        .checked_add(shipping_price)?;

    Ok(OrderPricing {
        products_price,
        shipping_price,
        voucher_discount: effective,
        total_price,
    })
}
