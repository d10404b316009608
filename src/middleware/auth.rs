use axum::{extract::FromRequestParts, http::header};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use crate::{
    dto::auth::Claims,
    error::AppError,
    models::{ROLE_ADMIN, ROLE_STOREOWNER},
    state::AppState,
};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role == ROLE_ADMIN || self.role == ROLE_STOREOWNER
    }
}

/// Admins and store owners manage the catalog and order lifecycle.
pub fn ensure_staff(user: &AuthUser) -> Result<(), AppError> {
    if !user.is_staff() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn ensure_owner_or_staff(user: &AuthUser, owner_id: Uuid) -> Result<(), AppError> {
    if user.user_id == owner_id || user.is_staff() {
        return Ok(());
    }
    Err(AppError::Forbidden)
}

pub fn decode_token(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    let user_id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user id in token".into()))?;

    Ok(AuthUser {
        user_id,
        role: decoded.claims.role,
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?
            .trim();

        decode_token(token, &state.config.jwt_secret)
    }
}
