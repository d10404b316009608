//! In-process storage backend.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! staged copy of the tables, so concurrent checkouts are serialised and a
//! rollback simply drops the copy.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Catalog, OrderLedger, Storage, StoreResult, Transaction};
use crate::{
    error::StoreError,
    models::{
        NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus, Product,
        ProductSnapshot,
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<Uuid, Product>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_order_items: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Arc<Faults>,
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Mutex<Tables>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let tables = Tables {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
            ..Tables::default()
        };
        Self {
            tables: Arc::new(AsyncMutex::new(tables)),
            faults: Arc::default(),
        }
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.tables.lock().await.products.get(&id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Test support: makes every subsequent order item insert fail.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_order_item_inserts(&self, fail: bool) {
        self.faults.fail_order_items.store(fail, Ordering::SeqCst);
    }
}

impl MemoryTransaction {
    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> StoreResult<R> {
        let mut tables = self
            .staged
            .lock()
            .map_err(|_| StoreError::Unavailable("transaction state poisoned".into()))?;
        Ok(f(&mut tables))
    }
}

impl Tables {
    fn resolve(&self, ids: &BTreeSet<Uuid>) -> HashMap<Uuid, ProductSnapshot> {
        ids.iter()
            .filter_map(|id| self.products.get(id))
            .map(|p| (p.id, ProductSnapshot::from(p)))
            .collect()
    }

    fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> bool {
        match self.products.get_mut(&product_id) {
            Some(product) if quantity > 0 && product.stock >= quantity => {
                product.stock -= quantity;
                product.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn create_order(&mut self, order: NewOrder) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.orders.push(Order {
            id,
            user_id: order.user_id,
            subtotal: order.subtotal,
            total: order.total,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            shipping_address: order.shipping_address,
            currency: order.currency,
            created_at: now,
            updated_at: now,
        });
        id
    }

    fn create_order_item(&mut self, item: NewOrderItem) -> StoreResult<Uuid> {
        if !self.orders.iter().any(|o| o.id == item.order_id) {
            return Err(StoreError::Corrupt(format!(
                "order item references missing order {}",
                item.order_id
            )));
        }
        let id = Uuid::new_v4();
        self.order_items.push(OrderItem {
            id,
            order_id: item.order_id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
            total: item.total,
            currency: item.currency,
            discount: item.discount,
            tax: item.tax,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.iter().find(|o| o.id == order_id).cloned()
    }

    fn orders_for_user(&self, user_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    fn items_for_order(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    fn order_item(&self, order_item_id: Uuid) -> Option<OrderItem> {
        self.order_items
            .iter()
            .find(|i| i.id == order_item_id)
            .cloned()
    }

    fn delete_order(&mut self, order_id: Uuid) -> bool {
        let before = self.orders.len();
        self.orders.retain(|o| o.id != order_id);
        if self.orders.len() == before {
            return false;
        }
        self.order_items.retain(|i| i.order_id != order_id);
        true
    }

    fn delete_order_item(&mut self, order_item_id: Uuid) -> bool {
        let before = self.order_items.len();
        self.order_items.retain(|i| i.id != order_item_id);
        self.order_items.len() != before
    }

    /// Applies `apply` only when `expected` holds for the current row.
    fn update_order(
        &mut self,
        order_id: Uuid,
        expected: impl FnOnce(&Order) -> bool,
        apply: impl FnOnce(&mut Order),
    ) -> Option<Order> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .filter(|o| expected(o))?;
        apply(order);
        order.updated_at = Utc::now();
        Some(order.clone())
    }
}

fn injected_item_failure(faults: &Faults) -> StoreResult<()> {
    if faults.fail_order_items.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("order item insert rejected".into()));
    }
    Ok(())
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn resolve(&self, product_ids: &BTreeSet<Uuid>) -> StoreResult<HashMap<Uuid, ProductSnapshot>> {
        Ok(self.tables.lock().await.resolve(product_ids))
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<bool> {
        Ok(self.tables.lock().await.decrement_stock(product_id, quantity))
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Uuid> {
        Ok(self.tables.lock().await.create_order(order))
    }

    async fn create_order_item(&self, item: NewOrderItem) -> StoreResult<Uuid> {
        injected_item_failure(&self.faults)?;
        self.tables.lock().await.create_order_item(item)
    }

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.order(order_id))
    }

    async fn get_orders_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        Ok(self.tables.lock().await.orders_for_user(user_id))
    }

    async fn get_order_items_by_order_id(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        Ok(self.tables.lock().await.items_for_order(order_id))
    }

    async fn get_order_item_by_id(&self, order_item_id: Uuid) -> StoreResult<Option<OrderItem>> {
        Ok(self.tables.lock().await.order_item(order_item_id))
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.lock().await.delete_order(order_id))
    }

    async fn delete_order_item(&self, order_item_id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.lock().await.delete_order_item(order_item_id))
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.update_order(
            order_id,
            |o| o.status == from,
            |o| o.status = to,
        ))
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.update_order(
            order_id,
            |o| o.payment_status == from,
            |o| o.payment_status = to,
        ))
    }
}

#[async_trait]
impl Storage for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = Mutex::new((*guard).clone());
        Ok(MemoryTransaction {
            guard,
            staged,
            faults: self.faults.clone(),
        })
    }
}

#[async_trait]
impl Catalog for MemoryTransaction {
    async fn resolve(&self, product_ids: &BTreeSet<Uuid>) -> StoreResult<HashMap<Uuid, ProductSnapshot>> {
        self.with_tables(|t| t.resolve(product_ids))
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<bool> {
        self.with_tables(|t| t.decrement_stock(product_id, quantity))
    }
}

#[async_trait]
impl OrderLedger for MemoryTransaction {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Uuid> {
        self.with_tables(|t| t.create_order(order))
    }

    async fn create_order_item(&self, item: NewOrderItem) -> StoreResult<Uuid> {
        injected_item_failure(&self.faults)?;
        self.with_tables(|t| t.create_order_item(item))?
    }

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        self.with_tables(|t| t.order(order_id))
    }

    async fn get_orders_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        self.with_tables(|t| t.orders_for_user(user_id))
    }

    async fn get_order_items_by_order_id(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        self.with_tables(|t| t.items_for_order(order_id))
    }

    async fn get_order_item_by_id(&self, order_item_id: Uuid) -> StoreResult<Option<OrderItem>> {
        self.with_tables(|t| t.order_item(order_item_id))
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<bool> {
        self.with_tables(|t| t.delete_order(order_id))
    }

    async fn delete_order_item(&self, order_item_id: Uuid) -> StoreResult<bool> {
        self.with_tables(|t| t.delete_order_item(order_item_id))
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        self.with_tables(|t| t.update_order(order_id, |o| o.status == from, |o| o.status = to))
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<Option<Order>> {
        self.with_tables(|t| {
            t.update_order(
                order_id,
                |o| o.payment_status == from,
                |o| o.payment_status = to,
            )
        })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard, staged, ..
        } = self;
        *guard = staged
            .into_inner()
            .map_err(|_| StoreError::Unavailable("transaction state poisoned".into()))?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(stock: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: "Ferris Mug".into(),
            description: None,
            image: None,
            price: dec!(12.00),
            currency: "USD".into(),
            stock,
            category: None,
            tags: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn resolve_omits_unknown_ids() {
        let p = product(3);
        let store = MemoryStore::with_products([p.clone()]);
        let ids = BTreeSet::from([p.id, Uuid::new_v4()]);

        let found = store.resolve(&ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&p.id].available_quantity, 3);
    }

    #[tokio::test]
    async fn decrement_is_conditional_on_stock() {
        let p = product(2);
        let store = MemoryStore::with_products([p.clone()]);

        assert!(store.decrement_stock(p.id, 2).await.unwrap());
        assert!(!store.decrement_stock(p.id, 1).await.unwrap());
        assert!(!store.decrement_stock(Uuid::new_v4(), 1).await.unwrap());
        assert_eq!(store.product(p.id).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn rollback_discards_staged_changes() {
        let p = product(5);
        let store = MemoryStore::with_products([p.clone()]);

        let tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(p.id, 4).await.unwrap());
        tx.rollback().await.unwrap();
        assert_eq!(store.product(p.id).await.unwrap().stock, 5);

        let tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(p.id, 4).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.product(p.id).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn deleting_an_order_removes_its_items() {
        let store = MemoryStore::new();
        let order_id = store
            .create_order(NewOrder {
                user_id: Uuid::new_v4(),
                subtotal: dec!(1.00),
                total: dec!(1.00),
                status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: "Credit Card".into(),
                shipping_address: "Somewhere".into(),
                currency: "USD".into(),
            })
            .await
            .unwrap();
        store
            .create_order_item(NewOrderItem {
                order_id,
                product_id: Uuid::new_v4(),
                product_name: "Ferris Mug".into(),
                quantity: 1,
                unit_price: dec!(1.00),
                subtotal: dec!(1.00),
                total: dec!(1.00),
                currency: "USD".into(),
                discount: dec!(0),
                tax: dec!(0),
            })
            .await
            .unwrap();

        assert!(store.delete_order(order_id).await.unwrap());
        assert!(store.get_order_items_by_order_id(order_id).await.unwrap().is_empty());
        assert!(!store.delete_order(order_id).await.unwrap());
    }

    #[tokio::test]
    async fn status_update_requires_the_expected_current_status() {
        let store = MemoryStore::new();
        let order_id = store
            .create_order(NewOrder {
                user_id: Uuid::new_v4(),
                subtotal: dec!(1.00),
                total: dec!(1.00),
                status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: "Credit Card".into(),
                shipping_address: "Somewhere".into(),
                currency: "USD".into(),
            })
            .await
            .unwrap();

        let moved = store
            .update_order_status(order_id, OrderStatus::Pending, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(moved.map(|o| o.status), Some(OrderStatus::Processing));

        let stale = store
            .update_order_status(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(stale.is_none());

        let stale = store
            .update_payment_status(order_id, PaymentStatus::Paid, PaymentStatus::Refunded)
            .await
            .unwrap();
        assert!(stale.is_none());

        let order = store.get_order_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }
}
