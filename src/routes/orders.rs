use axum::{
    Json, Router,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        DeletedOrder, OrderItemList, OrderList, OrderStatusChanged, OrderWithItems,
        PaymentStatusChanged, UpdateStatusRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{order_id}", get(get_order))
        .route("/user/{user_id}", get(list_user_orders))
        .route("/delete/{order_id}", delete(delete_order))
        .route("/update/status/{order_id}", post(update_order_status))
        .route("/update/paymentstatus/{order_id}", post(update_payment_status))
}

pub fn item_router() -> Router<AppState> {
    Router::new().route("/{order_id}", get(list_order_items))
}

#[utoipa::path(
    get,
    path = "/api/order/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with its items", body = ApiResponse<OrderWithItems>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let Path(order_id) = path?;
    let resp = order_service::get_order(&*state.store, &user, order_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/order/user/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Orders placed by a user", body = ApiResponse<OrderList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_user_orders(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let Path(user_id) = path?;
    let resp = order_service::list_user_orders(&*state.store, &user, user_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orderitem/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Items of an order", body = ApiResponse<OrderItemList>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_order_items(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<OrderItemList>>> {
    let Path(order_id) = path?;
    let resp = order_service::list_order_items(&*state.store, &user, order_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/order/delete/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order deleted", body = ApiResponse<DeletedOrder>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<DeletedOrder>>> {
    let Path(order_id) = path?;
    let resp = order_service::delete_order(&*state.store, &user, order_id).await?;
    audit::record(
        &state.pool,
        user.user_id,
        "order_delete",
        "orders",
        serde_json::json!({ "order_id": order_id }),
    )
    .await;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/order/update/status/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Order status changed", body = ApiResponse<OrderStatusChanged>),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Transition not allowed"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<OrderStatusChanged>>> {
    let Path(order_id) = path?;
    let Json(payload) = payload?;
    let resp =
        order_service::update_order_status(&*state.store, &user, order_id, payload).await?;
    if let Some(changed) = resp.data.as_ref() {
        audit::record(
            &state.pool,
            user.user_id,
            "order_status_update",
            "orders",
            serde_json::json!({ "order_id": order_id, "status": changed.status }),
        )
        .await;
    }
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/order/update/paymentstatus/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Payment status changed", body = ApiResponse<PaymentStatusChanged>),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Transition not allowed"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<PaymentStatusChanged>>> {
    let Path(order_id) = path?;
    let Json(payload) = payload?;
    let resp =
        order_service::update_payment_status(&*state.store, &user, order_id, payload).await?;
    if let Some(changed) = resp.data.as_ref() {
        audit::record(
            &state.pool,
            user.user_id,
            "payment_status_update",
            "orders",
            serde_json::json!({ "order_id": order_id, "payment_status": changed.payment_status }),
        )
        .await;
    }
    Ok(Json(resp))
}
