use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use rust_decimal::Decimal;
use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    models::{ROLE_ADMIN, ROLE_STOREOWNER, ROLE_USER},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&create_orm_conn(&pool)).await?;

    let admin_id = ensure_user(&pool, ("Ada", "Admin"), "admin@example.com", "admin123", ROLE_ADMIN).await?;
    let owner_id = ensure_user(
        &pool,
        ("Olive", "Owner"),
        "owner@example.com",
        "owner123",
        ROLE_STOREOWNER,
    )
    .await?;
    let user_id = ensure_user(&pool, ("Una", "User"), "user@example.com", "user123", ROLE_USER).await?;
    seed_products(&pool, &config.checkout.default_currency).await?;

    println!("Seed completed. Admin ID: {admin_id}, Store owner ID: {owner_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    (first_name, last_name): (&str, &str),
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, first_name, last_name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool, currency: &str) -> anyhow::Result<()> {
    let products = [
        ("Axum Hoodie", "Warm hoodie for Rustaceans", "apparel", Decimal::new(5500, 2), 50, &["hoodie", "winter"][..]),
        ("Ferris Mug", "Coffee tastes better with Ferris", "kitchen", Decimal::new(1200, 2), 100, &["mug", "gift"][..]),
        ("Rust Sticker Pack", "Decorate your laptop", "accessories", Decimal::new(500, 2), 200, &["stickers"][..]),
        ("E-book: Async Rust", "Learn async Rust patterns", "books", Decimal::new(2500, 2), 75, &["ebook", "async"][..]),
    ];

    for (name, desc, category, price, stock, tags) in products {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, currency, stock, category, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(currency)
        .bind(stock)
        .bind(category)
        .bind(tags)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
