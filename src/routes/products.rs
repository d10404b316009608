use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::PathRejection},
    http::StatusCode,
    routing::{get, patch, put},
};
use uuid::Uuid;

use crate::{
    dto::products::{
        AdjustStockRequest, CreateProductRequest, ProductList, SelectiveProductsQuery,
        UpdateProductRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::Product,
    response::ApiResponse,
    routes::params::ProductQuery,
    services::product_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/selective", get(get_selective_products))
        .route(
            "/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/{id}/stock", patch(adjust_stock))
        .route("/{id}/activate", put(activate_product))
        .route("/{id}/deactivate", put(deactivate_product))
}

#[utoipa::path(
    get,
    path = "/api/products",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("q" = Option<String>, Query, description = "Search in name, description and tags"),
        ("category" = Option<String>, Query, description = "Exact category"),
        ("tag" = Option<String>, Query, description = "Products carrying this tag"),
        ("min_price" = Option<String>, Query, description = "Lowest price, inclusive"),
        ("max_price" = Option<String>, Query, description = "Highest price, inclusive"),
        ("sort_by" = Option<String>, Query, description = "created_at | price | name | stock"),
        ("sort_order" = Option<String>, Query, description = "asc | desc"),
    ),
    responses(
        (status = 200, description = "List products", body = ApiResponse<ProductList>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = product_service::list_products(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/selective",
    params(
        ("ids" = String, Query, description = "Comma separated product IDs"),
    ),
    responses(
        (status = 200, description = "Products found for the given IDs", body = ApiResponse<ProductList>),
        (status = 400, description = "Missing or malformed IDs"),
    ),
    tag = "Products"
)]
pub async fn get_selective_products(
    State(state): State<AppState>,
    Query(query): Query<SelectiveProductsQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = product_service::get_products_by_ids(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Get product", body = ApiResponse<Product>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn get_product(
    path: Result<Path<Uuid>, PathRejection>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = path?;
    let resp = product_service::get_product(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Create product", body = ApiResponse<Product>),
        (status = 400, description = "Invalid product"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Name already taken"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Product>>)> {
    let resp = product_service::create_product(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    put,
    path = "/api/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Updated product", body = ApiResponse<Product>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    Json(payload): Json<UpdateProductRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = path?;
    let resp = product_service::update_product(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Deleted product"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let Path(id) = path?;
    let resp = product_service::delete_product(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/products/{id}/stock",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = ApiResponse<Product>),
        (status = 400, description = "Invalid adjustment"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    Json(payload): Json<AdjustStockRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = path?;
    let resp = product_service::adjust_stock(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/products/{id}/activate",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product activated", body = ApiResponse<Product>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn activate_product(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = path?;
    let resp = product_service::set_active(&state, &user, id, true).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/products/{id}/deactivate",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product deactivated", body = ApiResponse<Product>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn deactivate_product(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let Path(id) = path?;
    let resp = product_service::set_active(&state, &user, id, false).await?;
    Ok(Json(resp))
}
