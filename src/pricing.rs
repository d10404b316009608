//! Server-side pricing and stock checks for a submitted cart.
//!
//! Every monetary value is a [`Decimal`] rounded to cents with
//! round-half-away-from-zero. Line amounts are rounded individually and the
//! order totals are the sums of the rounded lines.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::{
    error::CheckoutError,
    models::{CartItem, ProductSnapshot},
};

pub type Snapshots = HashMap<Uuid, ProductSnapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePricing {
    pub subtotal: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPricing {
    pub subtotal: Decimal,
    pub total: Decimal,
    /// Pricing for each cart line, in cart order.
    pub lines: Vec<LinePricing>,
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Checks that every line refers to an active product with enough stock.
///
/// Quantities for a product listed on several lines are added up before
/// comparing against the available stock.
pub fn validate_stock(items: &[CartItem], snapshots: &Snapshots) -> Result<(), CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut requested: HashMap<Uuid, i64> = HashMap::new();
    for item in items {
        let snapshot = snapshots
            .get(&item.product_id)
            .filter(|s| s.is_active)
            .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;

        let wanted = requested.entry(item.product_id).or_insert(0);
        *wanted += i64::from(item.quantity);
        if i64::from(snapshot.available_quantity) < *wanted {
            return Err(CheckoutError::InsufficientStock(item.product_id));
        }
    }
    Ok(())
}

/// `subtotal = price × qty`, `total = subtotal − discount × price + tax × price`.
///
/// Amounts that leave the `Decimal` range are reported as an invalid line.
pub fn price_item(snapshot: &ProductSnapshot, item: &CartItem) -> Result<LinePricing, CheckoutError> {
    let price = snapshot.unit_price;
    let out_of_range = || CheckoutError::InvalidItem {
        product_id: item.product_id,
        reason: "amount out of range".into(),
    };

    let subtotal = price
        .checked_mul(Decimal::from(item.quantity))
        .ok_or_else(out_of_range)?;
    let discount = item.discount.checked_mul(price).ok_or_else(out_of_range)?;
    let tax = item.tax.checked_mul(price).ok_or_else(out_of_range)?;
    let total = subtotal
        .checked_sub(discount)
        .and_then(|t| t.checked_add(tax))
        .ok_or_else(out_of_range)?;

    Ok(LinePricing {
        subtotal: round_money(subtotal),
        total: round_money(total),
    })
}

pub fn price_order(items: &[CartItem], snapshots: &Snapshots) -> Result<OrderPricing, CheckoutError> {
    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    let mut total = Decimal::ZERO;

    for item in items {
        let snapshot = snapshots
            .get(&item.product_id)
            .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;
        let line = price_item(snapshot, item)?;
        let overflow = || CheckoutError::InvalidItem {
            product_id: item.product_id,
            reason: "order amount out of range".into(),
        };
        subtotal = subtotal.checked_add(line.subtotal).ok_or_else(overflow)?;
        total = total.checked_add(line.total).ok_or_else(overflow)?;
        lines.push(line);
    }

    Ok(OrderPricing {
        subtotal: round_money(subtotal),
        total: round_money(total),
        lines,
    })
}
