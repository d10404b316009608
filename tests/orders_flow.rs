use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use storefront_api::{
    config::{AppConfig, CheckoutConfig},
    db::{create_pool, run_migrations},
    dto::{
        cart::CheckoutRequest,
        orders::UpdateStatusRequest,
        products::{AdjustStockRequest, SelectiveProductsQuery},
    },
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::{AppError, CheckoutError},
    middleware::auth::AuthUser,
    models::{CartItem, OrderStatus, ROLE_STOREOWNER, ROLE_USER},
    routes::params::ProductQuery,
    services::{order_service, product_service, user_service},
    state::AppState,
};
use tokio::sync::Mutex;
use uuid::Uuid;

// Every test truncates the shared tables, so they take turns.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

fn database_url() -> Option<String> {
    // Allow skipping when no DB is configured in the environment.
    match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            None
        }
    }
}

// Integration flow: customer checks out, oversell is refused, store owner moves the order along.
#[tokio::test]
async fn checkout_and_fulfilment_flow() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let _guard = DB_LOCK.lock().await;
    let state = setup_state(&database_url).await?;

    let user_id = create_user(&state, ROLE_USER, "user@example.com").await?;
    let owner_id = create_user(&state, ROLE_STOREOWNER, "owner@example.com").await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Test Widget".into()),
        description: Set(Some("A product for testing".into())),
        image: Set(None),
        price: Set(dec!(10.00)),
        currency: Set("USD".into()),
        stock: Set(5),
        category: Set(Some("widgets".into())),
        tags: Set(vec!["test".into(), "gadget".into()]),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let customer = AuthUser {
        user_id,
        role: ROLE_USER.into(),
    };
    let owner = AuthUser {
        user_id: owner_id,
        role: ROLE_STOREOWNER.into(),
    };

    let item = |quantity: i32| CartItem {
        product_id: product.id,
        quantity,
        currency: "USD".into(),
        discount: dec!(0.1),
        tax: dec!(0.05),
    };

    let result = state
        .checkout
        .checkout(
            user_id,
            CheckoutRequest {
                items: vec![item(2)],
                shipping_address: Some("Somewhere".into()),
            },
        )
        .await?;
    assert_eq!(result.subtotal, dec!(20.00));
    assert_eq!(result.total, dec!(19.50));

    let stored = product_service::get_product(&state, product.id).await?;
    assert_eq!(stored.data.map(|p| p.stock), Some(3));

    // Asking for more than remains must not create an order or touch stock.
    let err = state
        .checkout
        .checkout(
            user_id,
            CheckoutRequest {
                items: vec![item(4)],
                shipping_address: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InsufficientStock(id) if id == product.id));

    let orders = order_service::list_user_orders(&*state.store, &customer, user_id).await?;
    assert_eq!(orders.data.map(|o| o.items.len()), Some(1));

    let fetched = order_service::get_order(&*state.store, &customer, result.order_id).await?;
    let fetched = fetched.data.expect("order data");
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.order.shipping_address, "Somewhere");

    order_service::update_order_status(
        &*state.store,
        &owner,
        result.order_id,
        UpdateStatusRequest {
            status: "processing".into(),
        },
    )
    .await?;
    let shipped = order_service::update_order_status(
        &*state.store,
        &owner,
        result.order_id,
        UpdateStatusRequest {
            status: "shipped".into(),
        },
    )
    .await?;
    assert_eq!(shipped.data.map(|c| c.status), Some(OrderStatus::Shipped));

    let restocked = product_service::adjust_stock(
        &state,
        &owner,
        product.id,
        AdjustStockRequest { delta: 7 },
    )
    .await?;
    assert_eq!(restocked.data.map(|p| p.stock), Some(10));

    let listed = product_service::list_products(
        &state,
        ProductQuery {
            category: Some("widgets".into()),
            ..ProductQuery::default()
        },
    )
    .await?;
    assert!(
        listed.data.expect("products").items.iter().any(|p| p.id == product.id),
        "expected product to appear in category listing"
    );

    let by_tag = product_service::list_products(
        &state,
        ProductQuery {
            tag: Some("Gadget".into()),
            ..ProductQuery::default()
        },
    )
    .await?;
    assert_eq!(
        by_tag.data.expect("products").items.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![product.id]
    );

    let searched = product_service::list_products(
        &state,
        ProductQuery {
            q: Some("gadg".into()),
            ..ProductQuery::default()
        },
    )
    .await?;
    assert!(searched.data.expect("products").items.iter().any(|p| p.id == product.id));

    let missing = Uuid::new_v4();
    let selective = product_service::get_products_by_ids(
        &state,
        SelectiveProductsQuery {
            ids: Some(format!("{missing},{}", product.id)),
        },
    )
    .await?;
    let selected = selective.data.expect("products").items;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].tags, vec!["test".to_string(), "gadget".to_string()]);

    let me = user_service::get_user(&state.pool, &customer, user_id).await?;
    let me = me.data.expect("user");
    assert_eq!(me.email, "user@example.com");
    let exposed = serde_json::to_value(&me)?;
    assert!(exposed.as_object().is_some_and(|o| o.keys().all(|k| !k.contains("password"))));

    let err = user_service::get_user(&state.pool, &customer, owner_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = user_service::get_user(&state.pool, &owner, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_checkouts_for_last_unit_sell_it_once() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let _guard = DB_LOCK.lock().await;
    let state = setup_state(&database_url).await?;

    let first = create_user(&state, ROLE_USER, "first@example.com").await?;
    let second = create_user(&state, ROLE_USER, "second@example.com").await?;
    let product = insert_product(&state, "Last Widget", dec!(10.00), 1).await?;

    let cart = || CheckoutRequest {
        items: vec![CartItem {
            product_id: product,
            quantity: 1,
            currency: "USD".into(),
            discount: dec!(0),
            tax: dec!(0),
        }],
        shipping_address: None,
    };

    let (a, b) = tokio::join!(
        state.checkout.checkout(first, cart()),
        state.checkout.checkout(second, cart()),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock(id)) if *id == product))
            .count(),
        1
    );

    let stored = product_service::get_product(&state, product).await?;
    assert_eq!(stored.data.map(|p| p.stock), Some(0));

    let staff = AuthUser {
        user_id: Uuid::new_v4(),
        role: ROLE_STOREOWNER.into(),
    };
    let mut orders = 0;
    for user_id in [first, second] {
        let listed = order_service::list_user_orders(&*state.store, &staff, user_id).await?;
        orders += listed.data.map(|o| o.items.len()).unwrap_or_default();
    }
    assert_eq!(orders, 1);
    Ok(())
}

#[tokio::test]
async fn stored_discount_keeps_line_totals_consistent() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let _guard = DB_LOCK.lock().await;
    let state = setup_state(&database_url).await?;

    let user_id = create_user(&state, ROLE_USER, "precise@example.com").await?;
    let product = insert_product(&state, "Precise Widget", dec!(100.00), 5).await?;
    let line = |discount| CartItem {
        product_id: product,
        quantity: 1,
        currency: "USD".into(),
        discount,
        tax: dec!(0),
    };

    let err = state
        .checkout
        .checkout(
            user_id,
            CheckoutRequest {
                items: vec![line(dec!(0.00005))],
                shipping_address: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidItem { .. }));

    let result = state
        .checkout
        .checkout(
            user_id,
            CheckoutRequest {
                items: vec![line(dec!(0.0001))],
                shipping_address: None,
            },
        )
        .await?;
    assert_eq!(result.total, dec!(99.99));

    let customer = AuthUser {
        user_id,
        role: ROLE_USER.into(),
    };
    let fetched = order_service::get_order(&*state.store, &customer, result.order_id).await?;
    let items = fetched.data.expect("order data").items;
    let stored = &items[0];
    assert_eq!(stored.discount, dec!(0.0001));
    let recomputed = stored.subtotal - stored.discount * stored.unit_price + stored.tax * stored.unit_price;
    assert_eq!(recomputed.round_dp(2), stored.total);

    let remaining = product_service::get_product(&state, product).await?;
    assert_eq!(remaining.data.map(|p| p.stock), Some(4));
    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_expiration_seconds: 60,
        checkout: CheckoutConfig::default(),
    };
    let state = AppState::new(pool, config);
    run_migrations(&state.orm).await?;

    // Clean tables between runs
    let backend = state.orm.get_database_backend();
    state
        .orm
        .execute(Statement::from_string(
            backend,
            "TRUNCATE TABLE order_items, orders, audit_logs, products, users RESTART IDENTITY CASCADE",
        ))
        .await?;

    Ok(state)
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        first_name: Set("Test".into()),
        last_name: Set(role.into()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn insert_product(
    state: &AppState,
    name: &str,
    price: rust_decimal::Decimal,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(None),
        image: Set(None),
        price: Set(price),
        currency: Set("USD".into()),
        stock: Set(stock),
        category: Set(None),
        tags: Set(Vec::new()),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}
