//! Order management on top of the [`OrderLedger`].
//!
//! Customers may read and delete their own orders. Status changes are staff
//! only and must follow the transitions defined on [`OrderStatus`] and
//! [`PaymentStatus`]. The ledger write is conditional on the status that was
//! checked, so a concurrent change surfaces as a conflict.

use uuid::Uuid;

use crate::{
    dto::{
        cart::DeletedOrderItem,
        orders::{
            DeletedOrder, OrderItemList, OrderList, OrderStatusChanged, OrderWithItems,
            PaymentStatusChanged, UpdateStatusRequest,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner_or_staff, ensure_staff},
    models::{Order, OrderStatus, PaymentStatus, UnknownStatus},
    response::{ApiResponse, Meta},
    store::OrderLedger,
};

async fn owned_order<L>(ledger: &L, user: &AuthUser, order_id: Uuid) -> AppResult<Order>
where
    L: OrderLedger + ?Sized,
{
    let order = ledger
        .get_order_by_id(order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    ensure_owner_or_staff(user, order.user_id)?;
    Ok(order)
}

pub async fn get_order<L>(
    ledger: &L,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>>
where
    L: OrderLedger + ?Sized,
{
    let order = owned_order(ledger, user, order_id).await?;
    let items = ledger.get_order_items_by_order_id(order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_user_orders<L>(
    ledger: &L,
    user: &AuthUser,
    user_id: Uuid,
) -> AppResult<ApiResponse<OrderList>>
where
    L: OrderLedger + ?Sized,
{
    ensure_owner_or_staff(user, user_id)?;
    let orders = ledger.get_orders_by_user_id(user_id).await?;
    let meta = Meta::unpaged(orders.len());

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn list_order_items<L>(
    ledger: &L,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderItemList>>
where
    L: OrderLedger + ?Sized,
{
    let order = owned_order(ledger, user, order_id).await?;
    let items = ledger.get_order_items_by_order_id(order.id).await?;
    let meta = Meta::unpaged(items.len());

    Ok(ApiResponse::success(
        "Ok",
        OrderItemList { items },
        Some(meta),
    ))
}

pub async fn delete_order<L>(
    ledger: &L,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<DeletedOrder>>
where
    L: OrderLedger + ?Sized,
{
    owned_order(ledger, user, order_id).await?;
    if !ledger.delete_order(order_id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(order_id = %order_id, user_id = %user.user_id, "order deleted");
    Ok(ApiResponse::success(
        "Order deleted",
        DeletedOrder { order_id },
        Some(Meta::empty()),
    ))
}

pub async fn delete_order_item<L>(
    ledger: &L,
    user: &AuthUser,
    order_item_id: Uuid,
) -> AppResult<ApiResponse<DeletedOrderItem>>
where
    L: OrderLedger + ?Sized,
{
    let item = ledger
        .get_order_item_by_id(order_item_id)
        .await?
        .ok_or(AppError::NotFound)?;
    owned_order(ledger, user, item.order_id).await?;

    if !ledger.delete_order_item(order_item_id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(order_item_id = %order_item_id, order_id = %item.order_id, "order item deleted");
    Ok(ApiResponse::success(
        "Order item deleted",
        DeletedOrderItem { order_item_id },
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status<L>(
    ledger: &L,
    user: &AuthUser,
    order_id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<OrderStatusChanged>>
where
    L: OrderLedger + ?Sized,
{
    ensure_staff(user)?;
    let next: OrderStatus = payload
        .status
        .parse()
        .map_err(|e: UnknownStatus| AppError::BadRequest(e.to_string()))?;

    let order = ledger
        .get_order_by_id(order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !order.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "order cannot move from {} to {}",
            order.status, next
        )));
    }

    let updated = ledger
        .update_order_status(order_id, order.status, next)
        .await?
        .ok_or_else(|| AppError::Conflict("order status changed concurrently, please retry".into()))?;

    tracing::info!(order_id = %order_id, from = %order.status, to = %updated.status, "order status changed");
    Ok(ApiResponse::success(
        "Order status updated",
        OrderStatusChanged {
            order_id,
            status: updated.status,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_payment_status<L>(
    ledger: &L,
    user: &AuthUser,
    order_id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<PaymentStatusChanged>>
where
    L: OrderLedger + ?Sized,
{
    ensure_staff(user)?;
    let next: PaymentStatus = payload
        .status
        .parse()
        .map_err(|e: UnknownStatus| AppError::BadRequest(e.to_string()))?;

    let order = ledger
        .get_order_by_id(order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !order.payment_status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "payment cannot move from {} to {}",
            order.payment_status, next
        )));
    }

    let updated = ledger
        .update_payment_status(order_id, order.payment_status, next)
        .await?
        .ok_or_else(|| AppError::Conflict("payment status changed concurrently, please retry".into()))?;

    tracing::info!(
        order_id = %order_id,
        from = %order.payment_status,
        to = %updated.payment_status,
        "payment status changed"
    );
    Ok(ApiResponse::success(
        "Payment status updated",
        PaymentStatusChanged {
            order_id,
            payment_status: updated.payment_status,
        },
        Some(Meta::empty()),
    ))
}
