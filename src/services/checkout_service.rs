//! Cart checkout: validate, re-price, reserve stock and record the order.
//!
//! Stock decrements and the order/item inserts share one storage
//! transaction. Any failure after it is opened rolls everything back, so a
//! failed checkout leaves neither reduced stock nor an orphaned order.

use std::{collections::BTreeSet, fmt, sync::Arc};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    config::{CheckoutConfig, normalize_currency},
    dto::cart::{CheckoutRequest, CheckoutResponse},
    error::CheckoutError,
    models::{CartItem, NewOrder, NewOrderItem, OrderStatus, PaymentStatus},
    pricing::{self, Snapshots},
    store::{Catalog, OrderLedger, Storage, Transaction},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStage {
    Received,
    Validated,
    Priced,
    StockReserved,
    Persisted,
    Completed,
    Failed(String),
}

impl fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckoutStage::Received => f.write_str("received"),
            CheckoutStage::Validated => f.write_str("validated"),
            CheckoutStage::Priced => f.write_str("priced"),
            CheckoutStage::StockReserved => f.write_str("stock_reserved"),
            CheckoutStage::Persisted => f.write_str("persisted"),
            CheckoutStage::Completed => f.write_str("completed"),
            CheckoutStage::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

struct StageTracker {
    user_id: Uuid,
    stage: CheckoutStage,
}

impl StageTracker {
    fn advance(&mut self, next: CheckoutStage) {
        tracing::debug!(user_id = %self.user_id, from = %self.stage, to = %next, "checkout stage");
        self.stage = next;
    }
}

pub struct CheckoutService<S> {
    store: Arc<S>,
    config: CheckoutConfig,
}

impl<S: Storage> CheckoutService<S> {
    pub fn new(store: Arc<S>, config: CheckoutConfig) -> Self {
        Self { store, config }
    }

    pub async fn checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let mut tracker = StageTracker {
            user_id,
            stage: CheckoutStage::Received,
        };

        match self.run(&mut tracker, user_id, request).await {
            Ok(result) => {
                tracker.advance(CheckoutStage::Completed);
                tracing::info!(
                    order_id = %result.order_id,
                    user_id = %user_id,
                    subtotal = %result.subtotal,
                    total = %result.total,
                    "checkout completed"
                );
                Ok(result)
            }
            Err(err) => {
                let failed_at = tracker.stage.to_string();
                tracker.advance(CheckoutStage::Failed(err.to_string()));
                tracing::warn!(user_id = %user_id, stage = %failed_at, error = %err, "checkout failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        tracker: &mut StageTracker,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let CheckoutRequest {
            items,
            shipping_address,
        } = request;

        let items = validate_items(items)?;
        let product_ids: BTreeSet<Uuid> = items.iter().map(|item| item.product_id).collect();
        tracker.advance(CheckoutStage::Validated);

        let tx = self.store.begin().await?;
        let outcome = self
            .reserve_and_record(&tx, tracker, user_id, &items, &product_ids, shipping_address)
            .await;

        match outcome {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "checkout rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn reserve_and_record(
        &self,
        tx: &S::Tx,
        tracker: &mut StageTracker,
        user_id: Uuid,
        items: &[CartItem],
        product_ids: &BTreeSet<Uuid>,
        shipping_address: Option<String>,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let snapshots: Snapshots = tx.resolve(product_ids).await?;

        pricing::validate_stock(items, &snapshots)?;
        let priced = pricing::price_order(items, &snapshots)?;
        tracker.advance(CheckoutStage::Priced);

        for item in items {
            if !tx.decrement_stock(item.product_id, item.quantity).await? {
                return Err(CheckoutError::InsufficientStock(item.product_id));
            }
        }
        tracker.advance(CheckoutStage::StockReserved);

        let order_id = tx
            .create_order(NewOrder {
                user_id,
                subtotal: priced.subtotal,
                total: priced.total,
                status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: self.config.default_payment_method.clone(),
                shipping_address: shipping_address
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| self.config.default_shipping_address.clone()),
                currency: self.config.default_currency.clone(),
            })
            .await?;

        for (item, line) in items.iter().zip(&priced.lines) {
            let snapshot = snapshots
                .get(&item.product_id)
                .ok_or(CheckoutError::ProductUnavailable(item.product_id))?;
            tx.create_order_item(NewOrderItem {
                order_id,
                product_id: item.product_id,
                product_name: snapshot.name.clone(),
                quantity: item.quantity,
                unit_price: snapshot.unit_price,
                subtotal: line.subtotal,
                total: line.total,
                currency: item.currency.clone(),
                discount: item.discount,
                tax: item.tax,
            })
            .await?;
        }
        tracker.advance(CheckoutStage::Persisted);

        Ok(CheckoutResponse {
            order_id,
            user_id,
            subtotal: priced.subtotal,
            total: priced.total,
        })
    }
}

/// Largest discount or tax an order item can store (`NUMERIC(10,4)`).
const RATE_LIMIT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const RATE_SCALE: u32 = 4;

fn check_rate(item: &CartItem, value: Decimal, field: &str) -> Result<(), CheckoutError> {
    let reason = if value < Decimal::ZERO {
        format!("{field} must not be negative")
    } else if value >= RATE_LIMIT {
        format!("{field} must be below {RATE_LIMIT}")
    } else if value.normalize().scale() > RATE_SCALE {
        format!("{field} allows at most {RATE_SCALE} decimal places")
    } else {
        return Ok(());
    };
    Err(CheckoutError::InvalidItem {
        product_id: item.product_id,
        reason,
    })
}

/// Rejects malformed lines before any storage is touched and normalises currency codes.
fn validate_items(items: Vec<CartItem>) -> Result<Vec<CartItem>, CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    items
        .into_iter()
        .map(|mut item| {
            if item.quantity <= 0 {
                return Err(CheckoutError::InvalidQuantity(item.product_id));
            }
            item.currency = normalize_currency(&item.currency).ok_or_else(|| {
                CheckoutError::InvalidItem {
                    product_id: item.product_id,
                    reason: format!("currency {:?} is not a 3-letter code", item.currency),
                }
            })?;
            check_rate(&item, item.discount, "discount")?;
            check_rate(&item, item.tax, "tax")?;
            Ok(item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i32, currency: &str) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            quantity,
            currency: currency.into(),
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
        }
    }

    #[test]
    fn validation_rejects_non_positive_quantity() {
        let bad = line(0, "USD");
        let id = bad.product_id;
        let err = validate_items(vec![line(1, "USD"), bad]).unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidQuantity(p) if p == id));
    }

    #[test]
    fn validation_normalises_currency() {
        let items = validate_items(vec![line(1, "eur")]).unwrap();
        assert_eq!(items[0].currency, "EUR");

        let err = validate_items(vec![line(1, "euro")]).unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidItem { .. }));
    }

    #[test]
    fn validation_rejects_negative_discount() {
        let mut item = line(1, "USD");
        item.discount = Decimal::new(-1, 1);
        assert!(matches!(
            validate_items(vec![item]).unwrap_err(),
            CheckoutError::InvalidItem { .. }
        ));
    }

    #[test]
    fn validation_bounds_discount_and_tax_to_stored_precision() {
        let mut item = line(1, "USD");
        item.discount = Decimal::new(5, 5);
        assert!(matches!(
            validate_items(vec![item]).unwrap_err(),
            CheckoutError::InvalidItem { .. }
        ));

        let mut item = line(1, "USD");
        item.tax = Decimal::new(1_000_000, 0);
        assert!(matches!(
            validate_items(vec![item]).unwrap_err(),
            CheckoutError::InvalidItem { .. }
        ));

        let mut item = line(1, "USD");
        item.discount = Decimal::MAX;
        assert!(matches!(
            validate_items(vec![item]).unwrap_err(),
            CheckoutError::InvalidItem { .. }
        ));

        let mut item = line(1, "USD");
        item.discount = Decimal::new(9_999_999_999, 4);
        item.tax = Decimal::new(1_000_000, 6);
        assert!(validate_items(vec![item]).is_ok());
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(CheckoutStage::StockReserved.to_string(), "stock_reserved");
        assert_eq!(
            CheckoutStage::Failed("cart is empty".into()).to_string(),
            "failed(cart is empty)"
        );
    }
}
