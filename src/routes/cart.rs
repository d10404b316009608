use axum::{
    Json, Router,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
    http::StatusCode,
    routing::{delete, post},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{CheckoutRequest, CheckoutResponse, DeletedOrderItem},
    error::AppResult,
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/delete_orderitem/{order_item_id}", delete(delete_order_item))
}

#[utoipa::path(
    post,
    path = "/api/cart/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created from cart", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Malformed cart"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Product not available"),
        (status = 409, description = "Insufficient stock"),
        (status = 500, description = "Order could not be recorded"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<CheckoutResponse>>)> {
    let Json(payload) = payload?;
    let result = state.checkout.checkout(user.user_id, payload).await?;

    audit::record(
        &state.pool,
        user.user_id,
        "checkout",
        "orders",
        serde_json::json!({ "order_id": result.order_id, "total": result.total }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Checkout success",
            result,
            Some(Meta::empty()),
        )),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/cart/delete_orderitem/{order_item_id}",
    params(
        ("order_item_id" = Uuid, Path, description = "Order item ID")
    ),
    responses(
        (status = 200, description = "Order item deleted", body = ApiResponse<DeletedOrderItem>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn delete_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<DeletedOrderItem>>> {
    let Path(order_item_id) = path?;
    let resp = order_service::delete_order_item(&*state.store, &user, order_item_id).await?;
    Ok(Json(resp))
}
