use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    config::normalize_currency,
    dto::products::{
        AdjustStockRequest, CreateProductRequest, ProductList, SelectiveProductsQuery,
        UpdateProductRequest,
    },
    entity::products::{ActiveModel, Column, Entity as Products},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_staff},
    models::Product,
    pricing::round_money,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
    store::sql::product_from_entity,
};

fn validate_price(price: Decimal) -> AppResult<Decimal> {
    if price < Decimal::ZERO {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    Ok(round_money(price))
}

fn validate_stock(stock: i32) -> AppResult<i32> {
    if stock < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }
    Ok(stock)
}

fn validate_currency(currency: &str) -> AppResult<String> {
    normalize_currency(currency)
        .ok_or_else(|| AppError::BadRequest(format!("currency {currency:?} is not a 3-letter code")))
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }
    Ok(name.to_string())
}

const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 40;
const MAX_SELECTIVE_IDS: usize = 100;

/// Trims and lower-cases tags, dropping blanks and repeats.
fn validate_tags(tags: Vec<String>) -> AppResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(AppError::BadRequest(format!(
                "tag {tag:?} is longer than {MAX_TAG_LEN} characters"
            )));
        }
        cleaned.push(tag);
    }
    if cleaned.len() > MAX_TAGS {
        return Err(AppError::BadRequest(format!("at most {MAX_TAGS} tags are allowed")));
    }
    Ok(cleaned)
}

/// Parses `ids=a,b,c` into distinct ids, keeping the requested order.
fn parse_ids(raw: Option<&str>) -> AppResult<Vec<Uuid>> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'ids' query parameter".into()))?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = Uuid::parse_str(part)
            .map_err(|_| AppError::BadRequest(format!("invalid product id {part:?}")))?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(AppError::BadRequest("missing 'ids' query parameter".into()));
    }
    if ids.len() > MAX_SELECTIVE_IDS {
        return Err(AppError::BadRequest(format!(
            "at most {MAX_SELECTIVE_IDS} ids per request"
        )));
    }
    Ok(ids)
}

/// Lists active products. Inactive ones stay reachable by id for staff.
pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern.clone()))
                .add(Expr::cust_with_values(
                    "array_to_string(tags, ' ') ILIKE $1",
                    [pattern],
                )),
        );
    }

    if let Some(category) = query.category.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(Column::Category.eq(category.clone()));
    }

    if let Some(tag) = query.tag.as_ref().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        condition = condition.add(Expr::cust_with_values("$1 = ANY(tags)", [tag.to_lowercase()]));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
        ProductSortBy::Stock => Column::Stock,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(product_from_entity);
    let result = match result {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", result, None))
}

/// Looks up several products at once. Unknown ids are left out and the
/// result follows the order of `ids`.
pub async fn get_products_by_ids(
    state: &AppState,
    query: SelectiveProductsQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let ids = parse_ids(query.ids.as_deref())?;

    let mut found: HashMap<Uuid, Product> = Products::find()
        .filter(Column::Id.is_in(ids.clone()))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|model| (model.id, product_from_entity(model)))
        .collect();
    let items: Vec<Product> = ids.iter().filter_map(|id| found.remove(id)).collect();

    let meta = Meta::unpaged(items.len());
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;

    let exist = Products::find()
        .filter(Column::Name.eq(payload.name.trim()))
        .one(&state.orm)
        .await?;
    if exist.is_some() {
        return Err(AppError::Conflict("a product with this name already exists".into()));
    }

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(validate_name(&payload.name)?),
        description: Set(payload.description),
        image: Set(payload.image),
        price: Set(validate_price(payload.price)?),
        currency: Set(validate_currency(&payload.currency)?),
        stock: Set(validate_stock(payload.stock)?),
        category: Set(payload.category),
        tags: Set(validate_tags(payload.tags)?),
        is_active: Set(payload.is_active),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await?;

    audit::record(
        &state.pool,
        user.user_id,
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(validate_name(&name)?);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(image) = payload.image {
        active.image = Set(Some(image));
    }
    if let Some(price) = payload.price {
        active.price = Set(validate_price(price)?);
    }
    if let Some(currency) = payload.currency {
        active.currency = Set(validate_currency(&currency)?);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(validate_stock(stock)?);
    }
    if let Some(category) = payload.category {
        active.category = Set(Some(category));
    }
    if let Some(tags) = payload.tags {
        active.tags = Set(validate_tags(tags)?);
    }
    active.updated_at = Set(chrono::Utc::now().into());

    let product = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        user.user_id,
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_staff(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        user.user_id,
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn adjust_stock(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: AdjustStockRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let new_stock = product
        .stock
        .checked_add(payload.delta)
        .filter(|stock| *stock >= 0)
        .ok_or_else(|| AppError::BadRequest("stock cannot be negative".into()))?;

    let mut active: ActiveModel = product.into();
    active.stock = Set(new_stock);
    active.updated_at = Set(chrono::Utc::now().into());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "stock_adjust",
        "products",
        serde_json::json!({ "product_id": updated.id, "delta": payload.delta }),
    )
    .await;

    Ok(ApiResponse::success(
        "Stock updated",
        product_from_entity(updated),
        Some(Meta::empty()),
    ))
}

pub async fn set_active(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    is_active: bool,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    active.is_active = Set(is_active);
    active.updated_at = Set(chrono::Utc::now().into());
    let product = active.update(&state.orm).await?;

    let action = if is_active {
        "product_activate"
    } else {
        "product_deactivate"
    };
    audit::record(
        &state.pool,
        user.user_id,
        action,
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        if is_active { "Activated" } else { "Deactivated" },
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_is_rounded_and_non_negative() {
        assert_eq!(validate_price(Decimal::new(19999, 3)).unwrap(), Decimal::new(2000, 2));
        assert!(validate_price(Decimal::new(-1, 2)).is_err());
    }

    #[test]
    fn currency_is_normalised() {
        assert_eq!(validate_currency("usd").unwrap(), "USD");
        assert!(validate_currency("dollars").is_err());
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(validate_name("   ").is_err());
        assert_eq!(validate_name(" Mug ").unwrap(), "Mug");
    }

    #[test]
    fn tags_are_trimmed_lowercased_and_deduplicated() {
        let tags = validate_tags(vec![" Gift ".into(), "gift".into(), "".into(), "Mug".into()]).unwrap();
        assert_eq!(tags, vec!["gift".to_string(), "mug".to_string()]);

        assert!(validate_tags(vec!["x".repeat(MAX_TAG_LEN + 1)]).is_err());
        let many = (0..=MAX_TAGS).map(|i| format!("tag{i}")).collect();
        assert!(validate_tags(many).is_err());
    }

    #[test]
    fn selective_ids_keep_order_and_drop_repeats() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let raw = format!("{a}, {b},{a},");
        assert_eq!(parse_ids(Some(&raw)).unwrap(), vec![a, b]);
    }

    #[test]
    fn selective_ids_must_be_present_and_well_formed() {
        assert!(matches!(parse_ids(None), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_ids(Some(" , ")), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_ids(Some("1,2,3")), Err(AppError::BadRequest(_))));

        let too_many = (0..=MAX_SELECTIVE_IDS)
            .map(|_| Uuid::new_v4().to_string())
            .collect::<Vec<_>>()
            .join(",");
        assert!(matches!(parse_ids(Some(&too_many)), Err(AppError::BadRequest(_))));
    }
}
