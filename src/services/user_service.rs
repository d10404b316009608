use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner_or_staff},
    models::User,
    response::{ApiResponse, Meta},
};

/// Profile lookup. Customers see only themselves; staff may see anyone.
pub async fn get_user(pool: &DbPool, user: &AuthUser, user_id: Uuid) -> AppResult<ApiResponse<User>> {
    ensure_owner_or_staff(user, user_id)?;

    let found: Option<User> = sqlx::query_as::<_, User>(
        "SELECT id, first_name, last_name, email, password_hash, role, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let found = found.ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("User", found, Some(Meta::empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ROLE_USER;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn customers_cannot_read_other_profiles() {
        // Never connects: the role check runs before any query.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let customer = AuthUser {
            user_id: Uuid::new_v4(),
            role: ROLE_USER.into(),
        };

        let err = get_user(&pool, &customer, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }
}
