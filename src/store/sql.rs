use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use uuid::Uuid;

use super::{Catalog, OrderLedger, Storage, StoreResult, Transaction};
use crate::{
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::StoreError,
    models::{
        NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus, Product,
        ProductSnapshot,
    },
};

/// sea-orm backed Catalog and Order Ledger.
///
/// `SqlStore<DatabaseConnection>` runs each call on the pool;
/// `SqlStore<DatabaseTransaction>` runs inside an open transaction and locks
/// resolved product rows until commit.
#[derive(Debug, Clone)]
pub struct SqlStore<C = DatabaseConnection> {
    conn: C,
    lock_rows: bool,
}

impl SqlStore<DatabaseConnection> {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            lock_rows: false,
        }
    }
}

#[async_trait]
impl<C> Catalog for SqlStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn resolve(&self, product_ids: &BTreeSet<Uuid>) -> StoreResult<HashMap<Uuid, ProductSnapshot>> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // Lock in id order so concurrent checkouts acquire rows consistently.
        let mut finder = Products::find()
            .filter(ProdCol::Id.is_in(product_ids.iter().copied()))
            .order_by_asc(ProdCol::Id);
        if self.lock_rows {
            finder = finder.lock(LockType::Update);
        }

        let rows = finder.all(&self.conn).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let product = product_from_entity(row);
                (product.id, ProductSnapshot::from(&product))
            })
            .collect())
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<bool> {
        if quantity <= 0 {
            return Ok(false);
        }
        let result = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
            .col_expr(ProdCol::UpdatedAt, Expr::cust("NOW()"))
            .filter(ProdCol::Id.eq(product_id))
            .filter(ProdCol::Stock.gte(quantity))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

#[async_trait]
impl<C> OrderLedger for SqlStore<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn create_order(&self, order: NewOrder) -> StoreResult<Uuid> {
        let model = OrderActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(order.user_id),
            subtotal: Set(order.subtotal),
            total: Set(order.total),
            status: Set(order.status.as_str().to_string()),
            payment_status: Set(order.payment_status.as_str().to_string()),
            payment_method: Set(order.payment_method),
            shipping_address: Set(order.shipping_address),
            currency: Set(order.currency),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&self.conn)
        .await?;
        Ok(model.id)
    }

    async fn create_order_item(&self, item: NewOrderItem) -> StoreResult<Uuid> {
        let model = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(item.order_id),
            product_id: Set(item.product_id),
            product_name: Set(item.product_name),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            subtotal: Set(item.subtotal),
            total: Set(item.total),
            currency: Set(item.currency),
            discount: Set(item.discount),
            tax: Set(item.tax),
            created_at: NotSet,
        }
        .insert(&self.conn)
        .await?;
        Ok(model.id)
    }

    async fn get_order_by_id(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Orders::find_by_id(order_id)
            .one(&self.conn)
            .await?
            .map(order_from_entity)
            .transpose()
    }

    async fn get_orders_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        Orders::find()
            .filter(OrderCol::UserId.eq(user_id))
            .order_by_desc(OrderCol::CreatedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(order_from_entity)
            .collect()
    }

    async fn get_order_items_by_order_id(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        Ok(OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order_id))
            .order_by_asc(OrderItemCol::CreatedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(order_item_from_entity)
            .collect())
    }

    async fn get_order_item_by_id(&self, order_item_id: Uuid) -> StoreResult<Option<OrderItem>> {
        Ok(OrderItems::find_by_id(order_item_id)
            .one(&self.conn)
            .await?
            .map(order_item_from_entity))
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<bool> {
        // order_items cascade on delete
        let result = Orders::delete_by_id(order_id).exec(&self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_order_item(&self, order_item_id: Uuid) -> StoreResult<bool> {
        let result = OrderItems::delete_by_id(order_item_id)
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        let result = Orders::update_many()
            .col_expr(OrderCol::Status, Expr::value(to.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::cust("NOW()"))
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::Status.eq(from.as_str()))
            .exec(&self.conn)
            .await?;
        if result.rows_affected != 1 {
            return Ok(None);
        }
        self.get_order_by_id(order_id).await
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> StoreResult<Option<Order>> {
        let result = Orders::update_many()
            .col_expr(OrderCol::PaymentStatus, Expr::value(to.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::cust("NOW()"))
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::PaymentStatus.eq(from.as_str()))
            .exec(&self.conn)
            .await?;
        if result.rows_affected != 1 {
            return Ok(None);
        }
        self.get_order_by_id(order_id).await
    }
}

#[async_trait]
impl Storage for SqlStore<DatabaseConnection> {
    type Tx = SqlStore<DatabaseTransaction>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let txn = self.conn.begin().await?;
        Ok(SqlStore {
            conn: txn,
            lock_rows: true,
        })
    }
}

#[async_trait]
impl Transaction for SqlStore<DatabaseTransaction> {
    async fn commit(self) -> StoreResult<()> {
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.conn.rollback().await?;
        Ok(())
    }
}

pub fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        image: model.image,
        price: model.price,
        currency: model.currency,
        stock: model.stock,
        category: model.category,
        tags: model.tags,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_from_entity(model: OrderModel) -> StoreResult<Order> {
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", model.id)))?;
    let payment_status = model
        .payment_status
        .parse::<PaymentStatus>()
        .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", model.id)))?;

    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        subtotal: model.subtotal,
        total: model.total,
        status,
        payment_status,
        payment_method: model.payment_method,
        shipping_address: model.shipping_address,
        currency: model.currency,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        subtotal: model.subtotal,
        total: model.total,
        currency: model.currency,
        discount: model.discount,
        tax: model.tax,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
