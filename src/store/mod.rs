//! Storage seams used by checkout and order management.
//!
//! [`Catalog`] and [`OrderLedger`] are implemented both outside and inside a
//! transaction. Checkout opens a [`Transaction`] through [`Storage::begin`] so
//! stock decrements and order inserts commit or roll back together.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus, ProductSnapshot},
};

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Snapshots for the requested ids that exist. Unknown ids are omitted.
    async fn resolve(&self, product_ids: &BTreeSet<Uuid>) -> StoreResult<HashMap<Uuid, ProductSnapshot>>;

    /// Takes `quantity` units out of stock. Returns `false` and changes nothing
    /// when the product is missing or holds fewer than `quantity` units.
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<bool>;
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Uuid>;
    async fn create_order_item(&self, item: NewOrderItem) -> StoreResult<Uuid>;

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<Order>>;
    async fn get_orders_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;
    async fn get_order_items_by_order_id(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>>;
    async fn get_order_item_by_id(&self, order_item_id: Uuid) -> StoreResult<Option<OrderItem>>;

    /// Returns `false` when no such order exists. Items go with the order.
    async fn delete_order(&self, order_id: Uuid) -> StoreResult<bool>;
    async fn delete_order_item(&self, order_item_id: Uuid) -> StoreResult<bool>;

    /// Moves the order from `from` to `to`. Returns `None` when the order is
    /// missing or no longer in `from`, in which case nothing is written.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>>;
    async fn update_payment_status(
        &self,
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<Option<Order>>;
}

#[async_trait]
pub trait Transaction: Catalog + OrderLedger + Sized {
    async fn commit(self) -> StoreResult<()>;
    async fn rollback(self) -> StoreResult<()>;
}

#[async_trait]
pub trait Storage: Catalog + OrderLedger {
    type Tx: Transaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}
